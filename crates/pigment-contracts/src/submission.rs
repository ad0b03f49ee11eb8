use serde::{Deserialize, Serialize};

pub const DEFAULT_REJECTION_REASON: &str = "Generation failed";

/// Body returned by the generation forwarder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmissionResponse {
    /// Accept/reject view; a rejection always carries reason text.
    pub fn into_result(self) -> Result<Option<String>, String> {
        if self.success {
            return Ok(self.message);
        }
        Err(self
            .error
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string()))
    }
}

/// Form fields of one submission.
pub fn submission_form(prompt: &str) -> [(&'static str, &str); 1] {
    [("prompt", prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_response_yields_message() -> anyhow::Result<()> {
        let parsed: SubmissionResponse = serde_json::from_str(
            r#"{"success":true,"message":"Generation started. Image will arrive via WebSocket."}"#,
        )?;
        assert_eq!(
            parsed.into_result(),
            Ok(Some(
                "Generation started. Image will arrive via WebSocket.".to_string()
            ))
        );
        Ok(())
    }

    #[test]
    fn rejection_uses_backend_reason_or_default() -> anyhow::Result<()> {
        let with_reason: SubmissionResponse =
            serde_json::from_str(r#"{"success":false,"error":"No prompt provided"}"#)?;
        assert_eq!(with_reason.into_result(), Err("No prompt provided".to_string()));

        let blank: SubmissionResponse =
            serde_json::from_str(r#"{"success":false,"error":"  "}"#)?;
        assert_eq!(blank.into_result(), Err(DEFAULT_REJECTION_REASON.to_string()));

        let bare: SubmissionResponse = serde_json::from_str(r#"{"success":false}"#)?;
        assert_eq!(bare.into_result(), Err(DEFAULT_REJECTION_REASON.to_string()));
        Ok(())
    }
}
