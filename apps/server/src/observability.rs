use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let env_filter = std::env::var("APP_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".to_string());

    let json = std::env::var("APP_LOG_FORMAT")
        .map(|value| value.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(true);

    let result = if json {
        builder
            .with_ansi(false)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .try_init()
    } else {
        builder.try_init()
    };

    if result.is_err() {
        tracing::debug!(component = "bootstrap", "tracing subscriber already installed");
        return;
    }

    tracing::info!(
        component = "bootstrap",
        version = env!("CARGO_PKG_VERSION"),
        json,
        "structured tracing initialized"
    );
}
