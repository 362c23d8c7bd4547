//! Shared test utilities.

#![allow(dead_code)]

pub mod mock_ws;

use std::time::Duration;

/// Poll `condition` every 20ms for up to 5s.
pub async fn wait_for<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}
