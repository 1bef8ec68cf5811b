//! Redis keys shared with the worker containers.
//!
//! The workers read these to decide what to decode and where to push;
//! the agent writes them on every consumer interaction.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::Result;

/// Hash per device: consumer access times and egress flags.
pub const LAST_ACCESS_PREFIX: &str = "last_access_time_";
/// Scalar per device: decode only keyframes.
pub const KEY_FRAME_ONLY_PREFIX: &str = "is_key_frame_only_";
/// Sidecar per device: codec descriptor of the most recent keyframe.
pub const CODEC_INFO_PREFIX: &str = "codec_info_";
/// Channel the workers listen on for buffered-decode requests.
pub const DECODE_REQUEST_CHANNEL: &str = "edge:decode:requests";

pub const FIELD_LAST_QUERY: &str = "last_query";
pub const FIELD_PROXY_RTMP: &str = "proxy_rtmp";
pub const FIELD_STORE: &str = "store";

/// Record a consumer poll for `device` at the current millisecond.
pub async fn touch_last_access(mut conn: ConnectionManager, device: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let key = format!("{}{}", LAST_ACCESS_PREFIX, device);
    let _: () = conn.hset(key, FIELD_LAST_QUERY, now).await?;
    Ok(())
}

pub async fn set_keyframe_only(
    mut conn: ConnectionManager,
    device: &str,
    keyframe_only: bool,
) -> Result<()> {
    let key = format!("{}{}", KEY_FRAME_ONLY_PREFIX, device);
    let _: () = conn.set(key, keyframe_only.to_string()).await?;
    Ok(())
}

/// Seed the egress flags when a camera with an rtmp endpoint starts.
pub async fn enable_proxy(mut conn: ConnectionManager, device: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let key = format!("{}{}", LAST_ACCESS_PREFIX, device);
    let _: () = conn
        .hset_multiple(
            key,
            &[
                (FIELD_LAST_QUERY, now.to_string()),
                (FIELD_PROXY_RTMP, "true".to_string()),
            ],
        )
        .await?;
    Ok(())
}

/// Flip the egress passthrough flag.
pub async fn set_proxy(mut conn: ConnectionManager, device: &str, on: bool) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let key = format!("{}{}", LAST_ACCESS_PREFIX, device);
    let _: () = conn
        .hset_multiple(
            key,
            &[
                (FIELD_LAST_QUERY, now.to_string()),
                (FIELD_PROXY_RTMP, on.to_string()),
            ],
        )
        .await?;
    Ok(())
}

/// Flip the cloud storage flag alongside the proxy flag.
pub async fn set_proxy_and_store(
    mut conn: ConnectionManager,
    device: &str,
    proxy: bool,
    store: bool,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let key = format!("{}{}", LAST_ACCESS_PREFIX, device);
    let _: () = conn
        .hset_multiple(
            key,
            &[
                (FIELD_LAST_QUERY, now.to_string()),
                (FIELD_PROXY_RTMP, proxy.to_string()),
                (FIELD_STORE, store.to_string()),
            ],
        )
        .await?;
    Ok(())
}

/// Codec descriptor of the most recent keyframe, if the worker wrote one.
pub async fn codec_info(mut conn: ConnectionManager, device: &str) -> Result<Option<String>> {
    let key = format!("{}{}", CODEC_INFO_PREFIX, device);
    let value: Option<String> = conn.get(key).await?;
    Ok(value)
}
