//! Event domain — Docker engine event streaming.

use super::client::{DockerClient, DockerError};
use futures_util::stream::StreamExt;

impl DockerClient {
    /// Stream Docker engine events, optionally filtered by object type
    /// (e.g. `container`).
    pub fn stream_events(
        &self,
        type_filters: Vec<String>,
    ) -> impl futures_util::Stream<Item = Result<bollard::models::EventMessage, DockerError>> + '_
    {
        use bollard::query_parameters::EventsOptionsBuilder;
        use std::collections::HashMap;

        let mut filters = HashMap::new();
        if !type_filters.is_empty() {
            filters.insert(
                "type",
                type_filters.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            );
        }

        let options = EventsOptionsBuilder::default().filters(&filters).build();

        self.client
            .events(Some(options))
            .map(|r| r.map_err(DockerError::from))
    }
}
