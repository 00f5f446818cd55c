use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Requests are read from `<prefix>/request` and answered on
    /// `<prefix>/response`.
    #[serde(default = "default_rpc_prefix")]
    pub prefix: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            prefix: default_rpc_prefix(),
        }
    }
}

fn default_rpc_prefix() -> String {
    String::from("stabilizer-ctl/rpc")
}
