mod circuit;
mod client;

pub use circuit::{CircuitBreaker, CircuitSnapshot};
pub use client::{
    CompiledInstruction, InnerInstructionGroup, RpcFabric, SignatureInfo, TokenBalance, TxDetail,
    UiTokenAmount,
};
