use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::json;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

#[tokio::main]
async fn main() {
    let url = Url::parse("ws://127.0.0.1:8080/ws").unwrap();

    println!("🔌 Connecting to milo-fallwatch...");

    // 1. Connect
    let (ws_stream, _) = connect_async(url.to_string())
        .await
        .expect("Failed to connect");

    let (mut write, _read) = ws_stream.split();

    println!("✅ Connected! Streaming accelerometer data...");

    let mut rng = rand::thread_rng();

    // 2. Normal walking: ~1g with jitter, at the 100ms sampling interval
    for i in 1..=50u64 {
        let packet = json!({
            "x": rng.gen_range(-0.2..0.2),
            "y": rng.gen_range(0.8..1.1),
            "z": rng.gen_range(-0.2..0.2),
            "t": 1_700_000_000_000u64 + i * 100
        });

        write
            .send(Message::Text(packet.to_string().into()))
            .await
            .unwrap();

        if i % 10 == 0 {
            println!("🚶 Walking... ({i}/50)");
        }
        sleep(Duration::from_millis(100)).await;
    }

    // 3. The fall: one hard impact with a strong vertical component
    println!("⚠️ SIMULATING FALL EVENT!");
    let fall_packet = json!({
        "x": 1.2,
        "y": 0.8,
        "z": 3.8,
        "t": 1_700_000_000_000u64 + 51 * 100
    });

    write
        .send(Message::Text(fall_packet.to_string().into()))
        .await
        .unwrap();

    // 4. Stillness: no further frames, so the inactivity timer can run its
    // course on the server. Watch the server log for the escalation.
    println!("🤫 Going still. Watch the server for the confirmed-fall alert...");
    sleep(Duration::from_secs(35)).await;
    println!("🛑 Simulation finished.");
}
