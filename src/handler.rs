use crate::common::*;
use crate::message::Message;
use crate::routing::RemoteNode;

/// A user-supplied observer of inbound messages. Registered via
/// `Node::add_message_handler` and invoked, in registration order, for
/// every successfully parsed inbound message regardless of type.
pub trait MessageHandler: Send {
  fn handle(&mut self, message: &Message, sender: &RemoteNode);
}

impl<F> MessageHandler for F
where
  F: FnMut(&Message, &RemoteNode) + Send,
{
  fn handle(&mut self, message: &Message, sender: &RemoteNode) {
    self(message, sender)
  }
}

/// The ordered list of registered handlers. Owns no state beyond the
/// list itself.
#[derive(Default)]
pub(crate) struct HandlerChain {
  handlers: Vec<Box<dyn MessageHandler>>,
}

impl HandlerChain {
  pub(crate) fn push(&mut self, handler: Box<dyn MessageHandler>) {
    self.handlers.push(handler);
  }

  /// Invoke every handler in registration order. A handler that panics is
  /// caught so the engine and the remaining handlers are unaffected.
  pub(crate) fn dispatch(&mut self, message: &Message, sender: &RemoteNode) {
    for handler in &mut self.handlers {
      let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        handler.handle(message, sender);
      }));
      if let Err(_) = result {
        log::warn!("message handler panicked; continuing with remaining handlers");
      }
    }
  }
}
