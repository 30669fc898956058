/// A synchronous fan-out channel owned by the component that emits on it.
/// The composition root wires cross-component subscriptions explicitly, so
/// there is no ambient global bus and teardown follows ownership.
pub struct Channel<E> {
    subscribers: Vec<Box<dyn Fn(&E)>>,
}

impl<E> Channel<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, subscriber: impl Fn(&E) + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    pub fn emit(&self, event: &E) {
        for subscriber in &self.subscribers {
            subscriber(event);
        }
    }
}

impl<E> Default for Channel<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Channel<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}
