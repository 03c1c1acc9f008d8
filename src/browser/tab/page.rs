//! Script evaluation and screenshot capture.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{Error, Result};

use super::Tab;

// ============================================================================
// Tab - Page Operations
// ============================================================================

impl Tab {
    /// Evaluates a JavaScript expression and returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Eval`] when the expression throws.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .channel
            .send(
                "Runtime.evaluate",
                json!({"expression": expression, "returnByValue": true}),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let text = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| exception.get("text").and_then(Value::as_str))
                .unwrap_or("JavaScript exception");
            return Err(Error::eval(text));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Captures a PNG screenshot of the page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] when the browser hands back an
    /// undecodable payload.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        debug!(session = %self.session(), "Capturing screenshot");

        let result = self
            .channel
            .send("Page.captureScreenshot", json!({"format": "png"}))
            .await?;

        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid("captureScreenshot returned no data"))?;

        Base64Standard
            .decode(data)
            .map_err(|e| Error::invalid(format!("invalid screenshot payload: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Browser;
    use crate::config::Config;
    use crate::manager::testsupport::{MockBrowser, default_respond, ok};
    use serde_json::json;

    fn config_for(mock: &MockBrowser) -> Config {
        Config::new(mock.address())
            .with_command_timeout("5s")
            .unwrap()
            .with_operation_timeout("5s")
            .unwrap()
    }

    #[tokio::test]
    async fn evaluate_returns_value_and_maps_exceptions() {
        let mock = MockBrowser::with_script(|call| {
            if call.method == "Runtime.evaluate" {
                let expr = call.params["expression"].as_str().unwrap_or("");
                if expr.contains("throw") {
                    vec![ok(
                        call.id,
                        json!({
                            "result": {"type": "object"},
                            "exceptionDetails": {
                                "text": "Uncaught",
                                "exception": {"description": "Error: boom"}
                            }
                        }),
                    )]
                } else {
                    vec![ok(call.id, json!({"result": {"type": "number", "value": 7}}))]
                }
            } else {
                default_respond(&call)
            }
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let tab = browser.new_tab().await.expect("tab");

        let value = tab.evaluate("3 + 4").await.expect("value");
        assert_eq!(value, json!(7));

        let err = tab.evaluate("throw new Error('boom')").await.expect_err("throws");
        assert_eq!(err.kind(), "EVAL_ERROR");
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn screenshot_decodes_payload() {
        let pixels = b"\x89PNG fake";
        let encoded = Base64Standard.encode(pixels);

        let mock = MockBrowser::with_script(move |call| {
            if call.method == "Page.captureScreenshot" {
                vec![ok(call.id, json!({"data": encoded.clone()}))]
            } else {
                default_respond(&call)
            }
        })
        .await;

        let browser = Browser::connect(config_for(&mock)).await.expect("connect");
        let tab = browser.new_tab().await.expect("tab");

        let bytes = tab.screenshot().await.expect("screenshot");
        assert_eq!(bytes, pixels);
    }
}
