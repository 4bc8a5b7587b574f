use settings::Settings;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

mod adapter;
mod comfortstat;
mod core;
mod settings;
mod sunbutton;

#[tokio::main(flavor = "multi_thread")]
pub async fn main() {
    let settings = Settings::new().expect("Error reading configuration");
    settings.monitoring.init().expect("Error initializing monitoring");

    let http_client = settings
        .http_client
        .new_tracing_client()
        .expect("Error creating HTTP client");

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let mqtt = settings.mqtt.as_ref().map(|mqtt| mqtt.new_client());
    let mqtt_sender = mqtt.as_ref().map(|mqtt| mqtt.sender());

    let comfortstats = settings
        .comfortstat
        .start(&http_client, &mut tasks, &cancel)
        .expect("Error starting comfortstat assets");

    let sunbuttons = settings
        .sunbutton
        .start(&http_client, mqtt_sender.as_ref(), &mut tasks, &cancel)
        .expect("Error starting sunbutton assets");

    tracing::info!(
        "Started {} comfortstat and {} sunbutton assets",
        comfortstats.len(),
        sunbuttons.len()
    );

    if let Some(mqtt) = mqtt {
        tasks.spawn(mqtt.run(cancel.clone()));
    }

    tokio::spawn({
        let cancel = cancel.clone();

        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Error waiting for shutdown signal: {}", e);
            }

            tracing::info!("Shutting down");
            cancel.cancel();
        }
    });

    let server = settings.http_server.run_server(
        move || {
            vec![
                adapter::state_api::new_routes("comfortstat", comfortstats.clone()),
                adapter::state_api::new_routes("sunbutton", sunbuttons.clone()),
            ]
        },
        cancel.clone(),
    );

    if let Err(e) = server.await {
        tracing::error!("HTTP server failed: {:?}", e);
        cancel.cancel();
    }

    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            tracing::error!("Task ended abnormally: {}", e);
        }
    }
}
