//! 世界 trait
//!
//! 定义仿真世界接口；仿真 DUT 的全部状态都挂在实现者上。

use std::any::Any;

/// 仿真世界：事件通过 `as_any_mut` 向下转型拿到具体状态。
pub trait World: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;
}
