// [libs/gateway/toolcall/src/lib.rs]
/*!
 * =================================================================
 * APARATO: TOOL-CALL ORCHESTRATOR (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: BUCLE MODELO↔HERRAMIENTA, IDEMPOTENCIA Y STREAMING
 * =================================================================
 */

mod assembler;
mod cache;
mod orchestrator;

pub use assembler::{AssembledToolCall, ToolCallAssembler, ToolCallFragment};
pub use cache::{idempotency_key, IdempotencyCache};
pub use orchestrator::{
    ConversationMessage, ModelCaller, ModelTurn, OrchestratorConfig, ToolCallError, ToolCallOrchestrator,
    ToolCallRequest, ToolExecutor, ToolOutcome,
};
