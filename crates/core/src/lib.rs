//! Client side of the voice relay: forwards transcribed caller utterances to
//! a hosted Langflow chat flow and decodes the generated reply.

pub mod chat_flow;
pub mod stream;

pub use chat_flow::{ChatFlowClient, ForwardError, LangflowClient, LangflowConfig};
pub use stream::TokenStream;
