pub type QuadkeyResult<T> = Result<T, QuadkeyError>;

#[derive(thiserror::Error, Debug)]
pub enum QuadkeyError {
    #[error("validation error: {0}")]
    Validation(String),

    /// Degenerate homography correspondence or malformed keyframe data.
    /// Recoverable: callers hold the last valid quad or skip the frame.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// Malformed preset payload. Recoverable: the offending preset is
    /// skipped, others still load.
    #[error("config error: {0}")]
    Config(String),

    #[error("render error: {0}")]
    Render(String),

    /// Fatal to the current export run only. `retriable` distinguishes
    /// timeouts (seek/decode deadline) from hard encoder failures.
    #[error("export error{}: {msg}", frame_suffix(*.frame))]
    Export {
        msg: String,
        frame: Option<u64>,
        retriable: bool,
    },

    #[error("export cancelled at frame {0}")]
    Cancelled(u64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn frame_suffix(frame: Option<u64>) -> String {
    match frame {
        Some(f) => format!(" at frame {f}"),
        None => String::new(),
    }
}

impl QuadkeyError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn export(msg: impl Into<String>, frame: Option<u64>) -> Self {
        Self::Export {
            msg: msg.into(),
            frame,
            retriable: false,
        }
    }

    pub fn export_timeout(msg: impl Into<String>, frame: Option<u64>) -> Self {
        Self::Export {
            msg: msg.into(),
            frame,
            retriable: true,
        }
    }

    /// Whether retrying the whole export could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Export { retriable: true, .. })
    }
}
