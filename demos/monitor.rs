use aereco_dxr::{AerecoClientBuilder, ConnectionConfig, Event};
use std::env;

#[tokio::main]
async fn main() -> aereco_dxr::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let host = args.get(1).expect("usage: monitor <host> [port]");
    let mut config = ConnectionConfig::new(host.clone());
    if let Some(port) = args.get(2) {
        config.port = port.parse().expect("port must be a number");
    }
    config.validate()?;

    let client = AerecoClientBuilder::from_config(&config)
        .on_event(|event| match event {
            Event::WarningRaised { code } => println!("warning {code} raised"),
            Event::WarningCleared { code } => println!("warning {code} cleared"),
            other => println!("{other:?}"),
        })
        .on_snapshot(|snap| {
            let timeout = snap
                .timeout
                .map(|t| format!(" | {t} left"))
                .unwrap_or_default();
            let airflow = snap
                .airflow
                .map(|a| format!("{a} m\u{00b3}/h"))
                .unwrap_or_else(|| "?".to_string());
            println!("mode: {} | airflow: {airflow}{timeout}", snap.mode);
            for room in snap.rooms.iter().flatten() {
                let co2 = room.co2_ppm.map(|p| format!(" {p} ppm")).unwrap_or_default();
                let temp = room.temperature.map(|t| format!(" {t}")).unwrap_or_default();
                println!("  [{}] {}{co2}{temp}", room.index, room.name);
            }
        })
        .build()?;

    println!("Polling {host} every {}s...", config.poll_interval_secs);
    let mut interval = tokio::time::interval(config.poll_interval());
    loop {
        interval.tick().await;
        if let Err(e) = client.refresh().await {
            eprintln!("Refresh error: {e}");
        }
    }
}
