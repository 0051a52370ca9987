mod settings;

pub use settings::{
    BrokerConfig, DatabaseConfig, JwtConfig, OtelConfig, OutboxConfig, RedisConfig, ServerConfig,
    Settings, WebConfig, WebTransportKind,
};
