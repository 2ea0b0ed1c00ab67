#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    Immediate,
    OnNextRestart,
    OnNextResume,
    OnNextSuspend,
}

impl InstallMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::OnNextRestart => "on-next-restart",
            Self::OnNextResume => "on-next-resume",
            Self::OnNextSuspend => "on-next-suspend",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Immediate => 0,
            Self::OnNextRestart => 1,
            Self::OnNextResume => 2,
            Self::OnNextSuspend => 3,
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "immediate" | "0" => Some(Self::Immediate),
            "on-next-restart" | "restart" | "1" => Some(Self::OnNextRestart),
            "on-next-resume" | "resume" | "2" => Some(Self::OnNextResume),
            "on-next-suspend" | "suspend" | "3" => Some(Self::OnNextSuspend),
            _ => None,
        }
    }

    /// Modes that reload the bundle in response to host lifecycle events.
    pub fn uses_lifecycle_listener(self) -> bool {
        matches!(
            self,
            Self::Immediate | Self::OnNextResume | Self::OnNextSuspend
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Running,
    Pending,
    Latest,
}

impl UpdateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Pending => "pending",
            Self::Latest => "latest",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Pending => 1,
            Self::Latest => 2,
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "running" | "0" => Some(Self::Running),
            "pending" | "1" => Some(Self::Pending),
            "latest" | "2" => Some(Self::Latest),
            _ => None,
        }
    }
}
