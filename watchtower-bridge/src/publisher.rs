//! Write path for locally observed values.
//!
//! Every topic is built under the active root. Nothing is buffered: while
//! disconnected a publish is simply skipped and reported as `false`.

use crate::connection::ConnectionManager;

#[derive(Clone)]
pub struct Publisher {
    connection: ConnectionManager,
}

impl Publisher {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    pub fn topic_for(&self, suffix: &str) -> String {
        format!("{}/{}", self.connection.root_topic(), suffix)
    }

    pub fn process_status(&self, name: &str, state: &str) -> bool {
        self.connection
            .publish(&self.topic_for(&format!("process_status/{name}")), state)
    }

    pub fn service_status(&self, name: &str, state: &str) -> bool {
        self.connection
            .publish(&self.topic_for(&format!("service_status/{name}")), state)
    }

    /// Publishes under `system/<path>`; returns the topic when it went out.
    pub fn system(&self, path: &str, value: &str) -> Option<String> {
        let topic = self.topic_for(&format!("system/{path}"));
        self.connection.publish(&topic, value).then_some(topic)
    }

    pub fn config(&self, config_json: &str) -> bool {
        self.connection
            .publish_retained(&self.topic_for("config"), config_json)
    }
}
