use core::any::Any;
use core::fmt::Debug;

use crate::error::UidError;

/// 应用消息的对象安全契约。
///
/// # 设计初衷（Why）
/// - 同一通道上可能承载多个消息族，编解码器需要以统一类型接收任意消息并按具体类型分派；
/// - 通过 `as_any` 暴露 `TypeId` 与向下转型能力，使 [`MultiProtocolCoder`](crate::MultiProtocolCoder)
///   能在构造期建立“类型 → 编解码器索引”的查找表，而不是每次都试编码。
///
/// # 契约说明（What）
/// - 消息在发送后视为不可变；唯一的例外是身份消息的 UID，它在发送前由传输层赋值一次；
/// - `identity` / `identity_mut` 默认返回 `None`，身份消息需覆盖二者。
pub trait Message: Any + Send + Sync + Debug {
    fn as_any(&self) -> &dyn Any;

    /// 具体类型名，仅用于日志与错误信息。
    fn type_name(&self) -> &'static str {
        core::any::type_name::<Self>()
    }

    fn identity(&self) -> Option<&dyn IdentityMessage> {
        None
    }

    fn identity_mut(&mut self) -> Option<&mut dyn IdentityMessage> {
        None
    }
}

impl<'a> dyn Message + 'a {
    /// 向下转型为具体消息类型。
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    pub fn is<M: Message>(&self) -> bool {
        self.as_any().is::<M>()
    }
}

/// 身份消息在一次关联交换中所处的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExchangeRole {
    /// 发起方消息，UID 由发起方的标识池分配。
    Request,
    /// 应答方消息，UID 回显对应请求的 UID。
    Response,
}

/// 携带 UID 的消息，用于把异步请求与最终响应配对。
///
/// # 使用方式（How）
/// - 发送请求前，传输层从 `IdentifierPool` 取出 UID 并调用 `assign_uid`；
/// - 应答方构造响应时回显请求 UID（通过 [`Uid::assigned`] 构造）；
/// - 接收方按 `role() == Response` 且 UID 命中挂起交换来完成配对。
pub trait IdentityMessage {
    fn uid(&self) -> Option<u32>;

    /// 赋值 UID，只允许成功一次。
    fn assign_uid(&mut self, uid: u32) -> Result<(), UidError>;

    fn role(&self) -> ExchangeRole;
}

/// 一次性 UID 字段。
///
/// 线上格式以 `i32` 小端存储；未赋值的字段编码为 `0`，解码得到 `0` 时视为未赋值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Uid(Option<u32>);

impl Uid {
    pub const fn unassigned() -> Self {
        Uid(None)
    }

    /// 以已知值构造，`0` 等价于未赋值。
    pub const fn assigned(uid: u32) -> Self {
        if uid == 0 { Uid(None) } else { Uid(Some(uid)) }
    }

    pub fn get(&self) -> Option<u32> {
        self.0
    }

    pub fn assign(&mut self, uid: u32) -> Result<(), UidError> {
        if uid == 0 {
            return Err(UidError::Reserved);
        }
        match self.0 {
            Some(existing) => Err(UidError::AlreadyAssigned(existing)),
            None => {
                self.0 = Some(uid);
                Ok(())
            }
        }
    }

    /// 线上表示。
    pub fn to_wire(self) -> i32 {
        self.0.unwrap_or(0) as i32
    }

    pub fn from_wire(raw: i32) -> Self {
        Uid::assigned(raw as u32)
    }
}

/// 为带 `uid: Uid` 字段的消息实现 [`Message`] 与 [`IdentityMessage`]。
#[macro_export]
macro_rules! identity_message {
    ($ty:ty, $role:expr) => {
        impl $crate::Message for $ty {
            fn as_any(&self) -> &dyn ::core::any::Any {
                self
            }

            fn identity(&self) -> Option<&dyn $crate::IdentityMessage> {
                Some(self)
            }

            fn identity_mut(&mut self) -> Option<&mut dyn $crate::IdentityMessage> {
                Some(self)
            }
        }

        impl $crate::IdentityMessage for $ty {
            fn uid(&self) -> Option<u32> {
                self.uid.get()
            }

            fn assign_uid(&mut self, uid: u32) -> Result<(), $crate::UidError> {
                self.uid.assign(uid)
            }

            fn role(&self) -> $crate::ExchangeRole {
                $role
            }
        }
    };
}
