use pigment_contracts::presentation::{Artifact, LogLevel, StatusClass};

/// Presentation sink driven by a session: status line, debug log, and the
/// final image.
pub trait Presenter: Send + Sync {
    fn begin_session(&self, _session_id: &str) {}

    fn end_session(&self) {}

    fn set_status(&self, text: &str, class: StatusClass);

    fn debug_log(&self, level: LogLevel, message: &str);

    fn render_image(&self, artifact: &Artifact) -> anyhow::Result<()>;

    fn render_fallback(&self, data_url: &str) -> anyhow::Result<()>;
}
