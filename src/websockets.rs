use actix_web::{web, HttpRequest, Responder};
use actix_ws::Message;
use futures_util::StreamExt;

use crate::model::{AccelerationSample, ClientCommand, Severity};
use crate::notify::broadcast_observer;
use crate::AppState;

/// **GET /ws**
///
/// One socket serves both directions: the device (or the simulator) streams
/// accelerometer samples up, dashboards receive live data and alerts back.
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<impl Responder, actix_web::Error> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;
    let mut rx = data.tx.subscribe();

    actix_rt::spawn(async move {
        loop {
            tokio::select! {
                val = msg_stream.next() => {
                    match val {
                        Some(Ok(Message::Text(text))) => {
                            // 1. Commands first (dashboard buttons)
                            if let Ok(cmd) = serde_json::from_str::<ClientCommand>(&text) {
                                handle_command(cmd, &data).await;
                            }
                            // 2. Then sensor data (device / simulator)
                            else if let Ok(sample) =
                                serde_json::from_str::<AccelerationSample>(&text)
                            {
                                data.sensor.ingest(sample);

                                // Raw data keeps the dashboard charts moving
                                let _ = data.tx.send(text.to_string());
                            } else {
                                log::debug!("unrecognized frame: {text}");
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = session.pong(&payload).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        _ => {}
                    }
                }
                val = rx.recv() => {
                    if let Ok(msg) = val {
                        if session.text(msg).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });

    Ok(res)
}

async fn handle_command(cmd: ClientCommand, data: &web::Data<AppState>) {
    match cmd.action.as_str() {
        // The senior (or a nurse on the dashboard) says everything is fine
        "CONFIRM_OK" => {
            log::info!("🛡️ user confirmed OK");
            data.engine.confirm_user_ok().await;
        }
        "SIMULATE_FALL" => {
            let severity = cmd.severity.unwrap_or(Severity::Moderate);
            data.engine.simulate_fall(severity).await;
        }
        "START_MONITORING" => {
            let started = data
                .engine
                .start(Some(broadcast_observer(data.tx.clone())))
                .await;
            let _ = data.tx.send(
                if started {
                    "MONITORING_STARTED"
                } else {
                    "MONITORING_UNAVAILABLE"
                }
                .to_string(),
            );
        }
        "STOP_MONITORING" => {
            data.engine.stop().await;
            let _ = data.tx.send("MONITORING_STOPPED".to_string());
        }
        other => log::debug!("unknown command: {other}"),
    }
}
