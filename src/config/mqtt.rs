use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MQTTConfig {
    /// Hostname or IP address of broker to contact.
    pub host: String,

    /// TCP port for MQTT connection.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// MQTT client id. Also names the topic device responses come back on,
    /// so it must be unique among clients talking to the same device.
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,

    /// MQTT username (requires password, if set)
    pub username: Option<String>,

    /// MQTT password (requires username, if set)
    pub password: Option<String>,

    /// Keep-alive interval, in seconds.
    #[serde(default = "default_keep_alive_s")]
    pub keep_alive_s: u64,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_client_id() -> String {
    String::from("stabilizer-ctl")
}

fn default_keep_alive_s() -> u64 {
    30
}
