//! Node-graph execution.
//!
//! * [`description`] - the serialized graph: nodes, ports, links
//! * [`channel`] - images, result entries and scalars moving between nodes
//! * [`context`] - per-run inputs and outputs shared with the caller
//! * [`registry`] - the closed set of node kinds
//! * [`executor`] - ordered execution and port routing

pub mod channel;
pub mod context;
pub mod description;
pub mod executor;
pub mod registry;

pub use channel::{
    Channel, ImageHandle, NodeInputs, NodeOutput, NodeRecord, ResultEntry, ScalarValue,
};
pub use context::{ExecutionContext, ReturnJson};
pub use description::{GraphDescription, InputPort, NodeSpec, OutputPort, PortKind, ScalarKind};
pub use executor::{GraphExecutor, ModelLoadItem, ModelLoadReport};
pub use registry::{FlowNode, NodeContext, NodeKind};
