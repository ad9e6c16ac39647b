use crate::config::ServerConfig;
use crate::services::config_store::ConfigGateway;
use crate::services::tsdb::TsdbClient;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub tsdb: TsdbClient,
    pub key_configs: ConfigGateway,
}
