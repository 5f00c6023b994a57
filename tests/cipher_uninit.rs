//! Runs in its own test binary so the process-wide key schedule is never
//! initialized.

use std::time::Duration;

use legacy_gameserver::cipher::keystream::transform;
use legacy_gameserver::cipher::{Iv, KeySchedule};
use legacy_gameserver::error::ServerError;
use legacy_gameserver::transport::client::ClientConnection;

#[tokio::test]
async fn cipher_refuses_to_run_before_init() {
    assert!(matches!(
        KeySchedule::global(),
        Err(ServerError::CipherNotInitialized)
    ));

    let mut data = [0x42u8; 8];
    assert!(matches!(
        transform(&mut data, Iv::new([1, 2, 3, 4])),
        Err(ServerError::CipherNotInitialized)
    ));
    assert_eq!(data, [0x42u8; 8], "data must be untouched");

    // The client refuses before it ever touches the network.
    let result = ClientConnection::connect("127.0.0.1:9", Duration::from_millis(200)).await;
    assert!(matches!(result, Err(ServerError::CipherNotInitialized)));
}
