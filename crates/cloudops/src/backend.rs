use cloudops_config::{Config, MEMORY_SCHEME};
use cloudops_core::{MemoryBackend, Transport};
use cloudops_http::{HttpConfig, HttpTransport};
use std::sync::Arc;

/// Transport selected by the configured endpoint
pub fn build_transport(config: &Config) -> anyhow::Result<Arc<dyn Transport>> {
    if config.is_memory() {
        let backend = MemoryBackend::new();
        if config.endpoint.trim_start_matches(MEMORY_SCHEME) == "demo" {
            seed_demo(&backend);
        }
        tracing::debug!("using in-memory backend");
        return Ok(Arc::new(backend));
    }

    let mut http = HttpConfig::new(&config.endpoint).with_request_timeout(config.request_timeout());
    match config.token() {
        Some(token) => http = http.with_token(token),
        None => tracing::warn!("{} is not set; requests are unauthenticated", config.token_env),
    }
    Ok(Arc::new(HttpTransport::new(http)?))
}

/// Fixed data set for `memory://demo`
fn seed_demo(backend: &MemoryBackend) {
    backend.put_instance("i-demo1", "running");
    backend.put_instance("i-demo2", "stopped");
    backend.put_function("demo-hello");
    backend.put_bucket("demo-archive");
    backend.put_object("demo-assets", "readme.txt", b"hello from cloudops\n");
    backend.put_object("demo-assets", "logo.svg", b"<svg/>");
}
