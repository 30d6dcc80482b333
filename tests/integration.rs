use std::sync::{Arc, Mutex};

use aereco_dxr::{AerecoClient, Event};

/// Run with: AERECO_HOST=192.168.1.50 cargo test --test integration -- --ignored
/// Read-only: never changes the device's mode or settings.
#[tokio::test]
#[ignore]
async fn refresh_live_device() {
    let host = std::env::var("AERECO_HOST").expect("AERECO_HOST must be set");
    let events: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(vec![]));
    let events_clone = events.clone();

    let client = AerecoClient::builder(host)
        .on_event(move |event| {
            events_clone.lock().unwrap().push(event.clone());
        })
        .build()
        .expect("build failed");

    let snapshot = client.refresh().await.expect("refresh failed");
    println!("{snapshot:#?}");
    assert!(snapshot.system_version.is_some(), "version should be readable");
    assert!(!snapshot.mode_configs.is_empty(), "mode configuration should be readable");

    {
        let captured = events.lock().unwrap();
        assert!(
            captured
                .iter()
                .any(|e| matches!(e, Event::ModeChanged { from: None, .. })),
            "first refresh should report the mode"
        );
    }

    // Rooms keep their slot index across cycles
    let again = client.refresh().await.expect("second refresh failed");
    if let (Some(a), Some(b)) = (&snapshot.rooms, &again.rooms) {
        for room in a {
            if let Some(same) = b.iter().find(|r| r.index == room.index) {
                assert_eq!(same.duct, room.duct);
            }
        }
    }
}
