use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化日志；`debug` 为真时默认级别提升到 debug，`RUST_LOG` 优先
pub fn init_logger(debug: bool) {
    let default_directive = if debug {
        "chatdigest=debug"
    } else {
        "chatdigest=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
