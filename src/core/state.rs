//! 状态定义：PaperStatus 状态机与进度阶段 Stage
//!
//! PENDING → RESEARCHING → PLANNING → WRITING → FORMATTING → COMPILING → COMPLETED，
//! 任意非终态都可以进入 FAILED；COMPLETED / FAILED 为终态，只有显式修订才能重新打开。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 论文会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperStatus {
    Pending,
    Researching,
    Planning,
    Writing,
    Formatting,
    Compiling,
    Completed,
    Failed,
}

impl PaperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Researching => "researching",
            Self::Planning => "planning",
            Self::Writing => "writing",
            Self::Formatting => "formatting",
            Self::Compiling => "compiling",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// 正常流程中的下一个状态；终态没有后继
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Researching),
            Self::Researching => Some(Self::Planning),
            Self::Planning => Some(Self::Writing),
            Self::Writing => Some(Self::Formatting),
            Self::Formatting => Some(Self::Compiling),
            Self::Compiling => Some(Self::Completed),
            Self::Completed | Self::Failed => None,
        }
    }

    /// 只允许前进一步，或从非终态进入 FAILED
    pub fn can_transition_to(&self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for PaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "researching" => Ok(Self::Researching),
            "planning" => Ok(Self::Planning),
            "writing" => Ok(Self::Writing),
            "formatting" => Ok(Self::Formatting),
            "compiling" => Ok(Self::Compiling),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown paper status: {other}")),
        }
    }
}

/// 进度事件所属阶段（比状态多一个 Revising）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Researching,
    Planning,
    Writing,
    Formatting,
    Compiling,
    Revising,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researching => "researching",
            Self::Planning => "planning",
            Self::Writing => "writing",
            Self::Formatting => "formatting",
            Self::Compiling => "compiling",
            Self::Revising => "revising",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PaperStatus; 8] = [
        PaperStatus::Pending,
        PaperStatus::Researching,
        PaperStatus::Planning,
        PaperStatus::Writing,
        PaperStatus::Formatting,
        PaperStatus::Compiling,
        PaperStatus::Completed,
        PaperStatus::Failed,
    ];

    #[test]
    fn test_happy_path_is_a_chain() {
        let mut path = vec![PaperStatus::Pending];
        while let Some(next) = path.last().and_then(|s| s.successor()) {
            assert!(path.last().unwrap().can_transition_to(next));
            path.push(next);
        }
        assert_eq!(path.last(), Some(&PaperStatus::Completed));
        assert_eq!(path.len(), 7);
    }

    #[test]
    fn test_failed_reachable_from_every_non_terminal() {
        for s in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(s.can_transition_to(PaperStatus::Failed), "{s}");
        }
    }

    #[test]
    fn test_terminal_states_are_closed() {
        for from in [PaperStatus::Completed, PaperStatus::Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!PaperStatus::Pending.can_transition_to(PaperStatus::Writing));
        assert!(!PaperStatus::Writing.can_transition_to(PaperStatus::Planning));
    }

    #[test]
    fn test_status_string_round_trip() {
        for s in ALL {
            assert_eq!(s.as_str().parse::<PaperStatus>().unwrap(), s);
        }
        assert!("unknown".parse::<PaperStatus>().is_err());
    }
}
