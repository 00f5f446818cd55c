use crate::config::MQTTConfig;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use std::time::Duration;

/// Requests that may queue towards the broker before publishers wait.
const REQUEST_CAPACITY: usize = 64;

pub struct MQTT(pub AsyncClient, pub EventLoop);

impl MQTT {
    pub fn from_config(mqtt_config: &MQTTConfig) -> MQTT {
        let mut options =
            MqttOptions::new(&mqtt_config.client_id, &mqtt_config.host, mqtt_config.port);
        options.set_keep_alive(Duration::from_secs(mqtt_config.keep_alive_s));
        if let Some((username, password)) = mqtt_config
            .username
            .as_ref()
            .zip(mqtt_config.password.as_ref())
        {
            options.set_credentials(username, password);
        }
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        MQTT(client, event_loop)
    }
}
