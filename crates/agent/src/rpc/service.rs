//! gRPC service implementation over the shared agent state.

use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, UnboundedReceiverStream};
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::cloud::api::call_api_with_body;
use crate::error::AgentError;
use crate::framebus::keys;
use crate::process::model::StreamFlags;
use crate::rpc::map;
use crate::rpc::proto;
use crate::rpc::EdgeVideo;
use crate::state::SharedState;

use serde::Serialize;

pub struct EdgeVideoService {
    state: SharedState,
}

impl EdgeVideoService {
    pub fn new(state: SharedState) -> Self {
        EdgeVideoService { state }
    }
}

#[derive(Serialize)]
struct StorageInput {
    enable: bool,
}

#[tonic::async_trait]
impl EdgeVideo for EdgeVideoService {
    type ListStreamsStream = UnboundedReceiverStream<Result<proto::ListStream, Status>>;

    async fn list_streams(
        &self,
        _request: Request<proto::ListStreamRequest>,
    ) -> Result<Response<Self::ListStreamsStream>, Status> {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = self.state.clone();

        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let sender = tx.clone();
            let result = state
                .processes
                .list_stream(&cancel, move |process| {
                    let item = map::convert_process(&process);
                    sender
                        .send(Ok(item))
                        .map_err(|_| AgentError::Transient("stream receiver gone".to_string()))
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "list stream aborted");
                let _ = tx.send(Err(map::map_agent_error(e)));
            }
        });

        Ok(Response::new(UnboundedReceiverStream::new(rx)))
    }

    type LatestFrameStream = ReceiverStream<Result<proto::VideoFrame, Status>>;

    async fn latest_frame(
        &self,
        request: Request<Streaming<proto::VideoFrameRequest>>,
    ) -> Result<Response<Self::LatestFrameStream>, Status> {
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(4);
        let state = self.state.clone();

        tokio::spawn(async move {
            loop {
                let next = match inbound.next().await {
                    Some(Ok(next)) => next,
                    Some(Err(e)) => {
                        warn!(error = %e, "latest frame request stream error");
                        break;
                    }
                    None => break,
                };

                let frame = match state
                    .framebus
                    .latest(&next.device_id, next.key_frame_only)
                    .await
                {
                    Ok(Some(record)) => map::convert_frame(record),
                    Ok(None) => proto::VideoFrame::default(),
                    Err(e) => {
                        warn!(device = %next.device_id, error = %e, "latest frame read failed");
                        proto::VideoFrame::default()
                    }
                };

                if tx.send(Ok(frame)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type BufferedFramesStream =
        Pin<Box<dyn Stream<Item = Result<proto::VideoFrame, Status>> + Send>>;

    async fn buffered_frames(
        &self,
        request: Request<proto::VideoBufferedRequest>,
    ) -> Result<Response<Self::BufferedFramesStream>, Status> {
        let req = request.into_inner();
        if req.device_id.is_empty() {
            return Err(Status::invalid_argument("device id required"));
        }

        let frames = self
            .state
            .framebus
            .buffered(&req.device_id, req.from_timestamp, req.to_timestamp)
            .await
            .map_err(map::map_agent_error)?;

        let stream = frames.map(|record| Ok(map::convert_frame(record)));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn probe(
        &self,
        request: Request<proto::ProbeRequest>,
    ) -> Result<Response<proto::ProbeResponse>, Status> {
        let req = request.into_inner();
        if req.device_id.is_empty() {
            return Err(Status::invalid_argument("device id required"));
        }

        let probe = self
            .state
            .framebus
            .probe(&req.device_id)
            .await
            .map_err(map::map_agent_error)?;

        Ok(Response::new(proto::ProbeResponse {
            codec: probe.codec.unwrap_or_default(),
            start_timestamp: probe.start_ms,
            end_timestamp: probe.end_ms,
            duration_ms: probe.duration_ms,
            frame_count: probe.frame_count,
            fps: probe.fps,
        }))
    }

    async fn system_time(
        &self,
        _request: Request<proto::SystemTimeRequest>,
    ) -> Result<Response<proto::SystemTimeResponse>, Status> {
        Ok(Response::new(proto::SystemTimeResponse {
            current_time_ms: chrono::Utc::now().timestamp_millis(),
        }))
    }

    async fn annotate(
        &self,
        request: Request<proto::AnnotateRequest>,
    ) -> Result<Response<proto::AnnotateResponse>, Status> {
        let event = map::convert_annotation(request.into_inner());

        self.state
            .batcher
            .annotate(&event)
            .await
            .map_err(map::map_agent_error)?;

        Ok(Response::new(proto::AnnotateResponse {
            device_name: event.device_name,
            r#type: event.event_type,
            start_timestamp: event.start_timestamp,
        }))
    }

    async fn storage(
        &self,
        request: Request<proto::StorageRequest>,
    ) -> Result<Response<proto::StorageResponse>, Status> {
        let req = request.into_inner();
        if req.device_id.is_empty() {
            return Err(Status::invalid_argument("device id required"));
        }

        let mut info = self
            .state
            .processes
            .info(&req.device_id)
            .await
            .map_err(map::map_agent_error)?;
        let rtmp = info.rtmp_endpoint.clone().unwrap_or_default();
        if rtmp.is_empty() {
            return Err(Status::invalid_argument(format!(
                "device {} has no associated egress stream",
                req.device_id
            )));
        }

        if self.state.config.api.endpoint.is_empty() {
            return Err(Status::invalid_argument(
                "cloud API endpoint is not configured",
            ));
        }
        let key = map::parse_rtmp_key(&rtmp).map_err(map::map_agent_error)?;
        let (edge_key, edge_secret) = self
            .state
            .settings
            .current_edge_credentials()
            .map_err(map::map_agent_error)?;

        let url = format!(
            "{}/api/v1/edge/storage/{}",
            self.state.config.api.endpoint, key
        );
        call_api_with_body(
            &self.state.http,
            reqwest::Method::PUT,
            &url,
            &StorageInput { enable: req.start },
            &edge_key,
            &edge_secret,
        )
        .await
        .map_err(map::map_agent_error)?;

        let mut flags = info.rtmp_stream_status.unwrap_or_default();
        flags.storing = req.start;
        info.rtmp_stream_status = Some(flags);
        self.state
            .processes
            .update_process_info(info)
            .await
            .map_err(map::map_agent_error)?;

        Ok(Response::new(proto::StorageResponse {
            device_id: req.device_id,
            start: req.start,
        }))
    }

    async fn proxy(
        &self,
        request: Request<proto::ProxyRequest>,
    ) -> Result<Response<proto::ProxyResponse>, Status> {
        let req = request.into_inner();
        if req.device_id.is_empty() {
            return Err(Status::invalid_argument("device id required"));
        }

        let mut info = self
            .state
            .processes
            .info(&req.device_id)
            .await
            .map_err(map::map_agent_error)?;
        if req.passthrough && info.rtmp_endpoint.as_deref().unwrap_or("").is_empty() {
            return Err(Status::invalid_argument(format!(
                "device {} has no associated egress stream",
                req.device_id
            )));
        }

        if let Err(e) =
            keys::set_proxy(self.state.redis.clone(), &req.device_id, req.passthrough).await
        {
            error!(device = %req.device_id, error = %e, "failed to flip proxy flag");
            return Err(map::map_agent_error(e));
        }

        let mut flags = info.rtmp_stream_status.unwrap_or(StreamFlags {
            streaming: false,
            storing: false,
        });
        flags.streaming = req.passthrough;
        info.rtmp_stream_status = Some(flags);
        self.state
            .processes
            .update_process_info(info)
            .await
            .map_err(map::map_agent_error)?;

        Ok(Response::new(proto::ProxyResponse {
            device_id: req.device_id,
            passthrough: req.passthrough,
        }))
    }
}
