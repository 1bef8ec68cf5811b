//! Annotation batcher — durable queue, batch consumer and edge
//! validation for worker-emitted annotation events.

pub mod consumer;
pub mod model;
pub mod queue;

pub use consumer::{AnnotationBatcher, ANNOTATION_QUEUE};
pub use model::{AnnotationEvent, AnnotationList};
pub use queue::DurableQueue;
