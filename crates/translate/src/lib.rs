//! Legacy (Kobold) protocol translation
//!
//! Request side: an ordered `Pipeline` of `RequestRewriter` steps turns a
//! flat Kobold generate body into a native chat completion request. Any step
//! may abort; an aborted request is dropped and never sent.
//!
//! Response side: `translate_response` decodes the upstream body, reshapes it
//! into `{"results":[{"text"}],"model"}` and re-encodes it with the coding the
//! upstream used.

pub mod encoding;
pub mod error;
pub mod kobold;
pub mod pipeline;
pub mod response;
pub mod rewriters;

pub use encoding::{ContentEncoding, negotiate_accept_encoding};
pub use error::{PipelineError, ResponseError, RewriteError};
pub use kobold::{KoboldRequest, KoboldResponse, KoboldResult};
pub use pipeline::{OutboundRequest, Pipeline, ReadyRequest, RequestRewriter, RewriteContext};
pub use response::{TranslatedResponse, translate_response};
pub use rewriters::{CapOutputTokens, ContentFilter, DisableStreaming, Finalize, TransformPayload};
