//! Outbound reply delivery
//!
//! One delivery attempt per reply; on failure a single short apology is
//! attempted before the turn gives up. There is never a third call and no
//! retry backoff.

use crate::platforms::PlatformClient;
use crate::Result;

/// Sent when the real reply could not be delivered
const DELIVERY_APOLOGY: &str = "ขออภัยค่ะ ระบบส่งข้อความขัดข้อง กรุณาติดต่อเจ้าหน้าที่ค่ะ";

/// Deliver `text`, falling back to a short apology on failure
///
/// The apology shares the fate of the original attempt; if it also fails the
/// error surfaces to the caller.
///
/// # Errors
///
/// Returns error if both the reply and the apology fail to send.
pub async fn deliver_with_fallback(
    client: &dyn PlatformClient,
    recipient_id: &str,
    text: &str,
) -> Result<()> {
    match client.send_text(recipient_id, text).await {
        Ok(()) => Ok(()),
        Err(first) => {
            tracing::warn!(
                platform = %client.platform(),
                error = %first,
                "reply delivery failed, sending apology"
            );
            client.send_text(recipient_id, DELIVERY_APOLOGY).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::platforms::Platform;
    use crate::Error;

    struct FlakyClient {
        /// Number of initial calls that fail
        failures: usize,
        calls: Mutex<Vec<String>>,
    }

    impl FlakyClient {
        fn new(failures: usize) -> Self {
            Self { failures, calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl PlatformClient for FlakyClient {
        fn platform(&self) -> Platform {
            Platform::Line
        }

        async fn send_text(&self, _recipient_id: &str, text: &str) -> Result<()> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(text.to_string());
            if calls.len() <= self.failures {
                return Err(Error::Delivery("scripted failure".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_success_sends_once() {
        let client = FlakyClient::new(0);
        deliver_with_fallback(&client, "U1", "สวัสดีค่ะ").await.unwrap();

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), ["สวัสดีค่ะ"]);
    }

    #[tokio::test]
    async fn test_failure_sends_apology() {
        let client = FlakyClient::new(1);
        deliver_with_fallback(&client, "U1", "สวัสดีค่ะ").await.unwrap();

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], DELIVERY_APOLOGY);
    }

    #[tokio::test]
    async fn test_double_failure_stops_at_two_attempts() {
        let client = FlakyClient::new(2);
        let result = deliver_with_fallback(&client, "U1", "สวัสดีค่ะ").await;

        assert!(matches!(result, Err(Error::Delivery(_))));
        assert_eq!(client.calls.lock().unwrap().len(), 2);
    }
}
