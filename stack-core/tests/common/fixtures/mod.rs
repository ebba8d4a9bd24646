//! 集成测试公用工具：
//! - 记录调用的编排客户端替身
//! - 临时目录中的测试部署

// 各测试文件只用到其中一部分
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod mock_orchestrator;
pub mod test_stack;

pub use mock_orchestrator::{Call, MockOrchestrator, Verb};
pub use test_stack::*;
