//! Typed input/output ports and type-checked connections.
//!
//! Ports are `Arc`-shared endpoints bound to a module. Payloads travel
//! through the graph as type-erased envelopes; the declared payload type is
//! enforced at `connect` time (`TypeId` equality, since Rust has no payload
//! subtyping) and re-checked per item by the worker.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, info, warn};

use crate::errors::ConnectError;
use crate::module::{HandlerResult, ModuleCore};
use crate::params::ParamValue;
use crate::queue;

/// Anything that can travel through a connection.
pub trait Payload: Any + Clone + Send + 'static {}
impl<T: Any + Clone + Send + 'static> Payload for T {}

pub(crate) struct Envelope {
    pub(crate) value: Box<dyn Any + Send>,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl Envelope {
    fn new<T: Payload>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

pub(crate) type ErasedHandler = Box<dyn FnMut(Envelope) -> HandlerResult + Send>;

pub(crate) struct InputShared {
    pub(crate) module: Weak<ModuleCore>,
    pub(crate) module_name: String,
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) config_keys: Vec<String>,
    pub(crate) tx: queue::Sender<Envelope>,
    pub(crate) rx: Mutex<Option<queue::Receiver<Envelope>>>,
    pub(crate) handler: Mutex<Option<ErasedHandler>>,
    pub(crate) working: std::sync::atomic::AtomicBool,
    upstream: Mutex<Vec<Weak<OutputShared>>>,
    relays: Mutex<Vec<Arc<InputShared>>>,
}

impl InputShared {
    pub(crate) fn label(&self) -> String {
        format!("{}.{}", self.module_name, self.name)
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.upstream.lock().unwrap().is_empty() || !self.relays.lock().unwrap().is_empty()
    }

    pub(crate) fn has_handler_or_relay(&self) -> bool {
        self.handler.lock().unwrap().is_some() || !self.relays.lock().unwrap().is_empty()
    }

    pub(crate) fn enqueue(&self, env: Envelope) {
        let dropped = self.tx.send_drop_oldest(env);
        if dropped > 0 {
            warn!("queue overflow on {}: dropped {} oldest item(s)", self.label(), dropped);
        }
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.tx.len()
    }
}

pub(crate) struct OutputShared {
    pub(crate) module: Weak<ModuleCore>,
    pub(crate) module_name: String,
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) config_keys: Vec<String>,
    connections: Mutex<Vec<Arc<InputShared>>>,
    relays: Mutex<Vec<Arc<OutputShared>>>,
}

impl OutputShared {
    pub(crate) fn label(&self) -> String {
        format!("{}.{}", self.module_name, self.name)
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.connections.lock().unwrap().is_empty() || !self.relays.lock().unwrap().is_empty()
    }

    /// Resolve the configuration map this output advertises: its keys,
    /// valued from the owning module's registry unless overridden.
    fn resolve_config(
        &self,
        update: Option<&BTreeMap<String, ParamValue>>,
    ) -> BTreeMap<String, ParamValue> {
        let mut map = BTreeMap::new();
        let module = self.module.upgrade();
        for key in &self.config_keys {
            let value = update
                .and_then(|u| u.get(key).cloned())
                .or_else(|| module.as_ref().and_then(|m| m.param(key)));
            if let Some(value) = value {
                map.insert(key.clone(), value);
            }
        }
        map
    }

    pub(crate) fn emit_configuration(
        self: &Arc<Self>,
        update: Option<&BTreeMap<String, ParamValue>>,
    ) {
        let map = self.resolve_config(update);
        if map.is_empty() {
            return;
        }
        let connections = self.connections.lock().unwrap().clone();
        for input in connections {
            if let Some(module) = input.module.upgrade() {
                module.apply_config(&map, &self.module_name);
            }
        }
    }

    fn publish_envelopes<T: Payload>(&self, value: &T) {
        let connections = self.connections.lock().unwrap().clone();
        for input in connections {
            input.enqueue(Envelope::new(value.clone()));
        }
    }
}

pub(crate) fn connect_shared(
    out: &Arc<OutputShared>,
    inp: &Arc<InputShared>,
) -> Result<(), ConnectError> {
    if out.type_id != inp.type_id {
        return Err(ConnectError::TypeMismatch {
            from_module: out.module_name.clone(),
            from_port: out.name.clone(),
            from_type: out.type_name,
            to_module: inp.module_name.clone(),
            to_port: inp.name.clone(),
            to_type: inp.type_name,
        });
    }
    if let (Some(a), Some(b)) = (out.module.upgrade(), inp.module.upgrade()) {
        if Arc::ptr_eq(&a, &b) {
            return Err(ConnectError::SelfLoop {
                module: out.module_name.clone(),
                from_port: out.name.clone(),
                to_port: inp.name.clone(),
            });
        }
    }

    out.connections.lock().unwrap().push(inp.clone());
    inp.upstream.lock().unwrap().push(Arc::downgrade(out));
    info!("connected {} => {}", out.label(), inp.label());

    out.emit_configuration(None);

    // a relay on either side joins every connection its primary makes
    let out_relays = out.relays.lock().unwrap().clone();
    for relay in out_relays {
        connect_shared(&relay, inp)?;
    }
    let inp_relays = inp.relays.lock().unwrap().clone();
    for relay in inp_relays {
        connect_shared(out, &relay)?;
    }
    Ok(())
}

/// Typed output endpoint. Clones share the underlying port.
pub struct Output<T> {
    pub(crate) shared: Arc<OutputShared>,
    _marker: PhantomData<T>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Payload> Output<T> {
    pub(crate) fn from_shared(shared: Arc<OutputShared>) -> Self {
        Self {
            shared,
            _marker: PhantomData,
        }
    }

    /// Wire this output to a compatible input and immediately propagate
    /// configuration to it.
    pub fn connect<U: Payload>(&self, input: &Input<U>) -> Result<(), ConnectError> {
        connect_shared(&self.shared, &input.shared)
    }

    /// Deliver a clone of `value` into every connected queue.
    pub fn publish(&self, value: &T) {
        self.shared.publish_envelopes(value);
    }

    /// Re-send configuration to every connected input. With `update`,
    /// listed keys override the module's current values.
    pub fn emit_configuration(&self, update: Option<&BTreeMap<String, ParamValue>>) {
        self.shared.emit_configuration(update);
    }

    /// Make `other` a mirror recipient: every connection made on this
    /// output is also made for `other`, now and in the future.
    pub fn relay(&self, other: &Output<T>) -> Result<(), ConnectError> {
        self.shared.relays.lock().unwrap().push(other.shared.clone());
        let existing = self.shared.connections.lock().unwrap().clone();
        for inp in existing {
            connect_shared(&other.shared, &inp)?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn port_ref(&self) -> PortRef {
        PortRef::output(self.shared.clone())
    }
}

/// Typed input endpoint with its bounded receive queue. Clones share the
/// underlying port.
pub struct Input<T> {
    pub(crate) shared: Arc<InputShared>,
    _marker: PhantomData<T>,
}

impl<T> Clone for Input<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Payload> Input<T> {
    pub(crate) fn from_shared(shared: Arc<InputShared>) -> Self {
        Self {
            shared,
            _marker: PhantomData,
        }
    }

    /// Enqueue an item directly, bypassing any connection. Used by modules
    /// that feed their own inputs.
    pub fn push(&self, value: T) {
        self.shared.enqueue(Envelope::new(value));
    }

    /// Enqueue a type-erased item. The worker warns on a declared-type
    /// mismatch but still attempts delivery.
    pub fn push_erased(&self, value: Box<dyn Any + Send>, type_name: &'static str) {
        let type_id = value.as_ref().type_id();
        self.shared.enqueue(Envelope {
            value,
            type_id,
            type_name,
        });
    }

    /// Install the handler invoked by this input's worker.
    pub fn set_handler<F>(&self, mut f: F)
    where
        F: FnMut(T) -> HandlerResult + Send + 'static,
    {
        let label = self.shared.label();
        let erased: ErasedHandler = Box::new(move |env: Envelope| match env.value.downcast::<T>() {
            Ok(v) => f(*v),
            Err(_) => {
                debug!("{}: discarding payload of foreign type {}", label, env.type_name);
                Ok(())
            }
        });
        *self.shared.handler.lock().unwrap() = Some(erased);
    }

    /// Dequeue one item directly, without going through the worker. Meant
    /// for inputs that are polled instead of handled; returns `None` when
    /// the queue is empty or the worker owns the receiver.
    pub fn try_take(&self) -> Option<T> {
        let rx = self.shared.rx.lock().unwrap();
        let env = rx.as_ref()?.try_recv()?;
        match env.value.downcast::<T>() {
            Ok(v) => Some(*v),
            Err(_) => {
                warn!(
                    "{} expects {} but the queue held {}",
                    self.shared.label(),
                    self.shared.type_name,
                    env.type_name
                );
                None
            }
        }
    }

    /// Forward everything published to this input to `other` as well.
    pub fn relay(&self, other: &Input<T>) -> Result<(), ConnectError> {
        self.shared.relays.lock().unwrap().push(other.shared.clone());
        let upstream = self.shared.upstream.lock().unwrap().clone();
        for out in upstream.iter().filter_map(|w| w.upgrade()) {
            connect_shared(&out, &other.shared)?;
        }
        Ok(())
    }

    /// True when every configuration key declared on this input has a
    /// value in the owning module's registry.
    pub fn is_configured(&self) -> bool {
        let Some(module) = self.shared.module.upgrade() else {
            return false;
        };
        self.shared
            .config_keys
            .iter()
            .all(|key| module.param(key).is_some())
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue_len()
    }

    pub fn port_ref(&self) -> PortRef {
        PortRef::input(self.shared.clone())
    }
}

/// Type-erased handle on a port, for wiring layers that work on port lists
/// rather than typed fields.
#[derive(Clone)]
pub struct PortRef {
    inner: PortRefInner,
}

#[derive(Clone)]
enum PortRefInner {
    Output(Arc<OutputShared>),
    Input(Arc<InputShared>),
}

impl PortRef {
    pub(crate) fn output(shared: Arc<OutputShared>) -> Self {
        Self {
            inner: PortRefInner::Output(shared),
        }
    }

    pub(crate) fn input(shared: Arc<InputShared>) -> Self {
        Self {
            inner: PortRefInner::Input(shared),
        }
    }

    pub fn label(&self) -> String {
        match &self.inner {
            PortRefInner::Output(o) => o.label(),
            PortRefInner::Input(i) => i.label(),
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self.inner, PortRefInner::Output(_))
    }
}

/// Connect two ports checked at runtime only. Unlike the typed
/// [`Output::connect`], this can also fail with `WrongDirection`.
pub fn connect_dyn(from: &PortRef, to: &PortRef) -> Result<(), ConnectError> {
    match (&from.inner, &to.inner) {
        (PortRefInner::Output(out), PortRefInner::Input(inp)) => connect_shared(out, inp),
        _ => Err(ConnectError::WrongDirection {
            got: format!("{} -> {}", from.label(), to.label()),
        }),
    }
}

pub(crate) fn new_input_shared<T: Payload>(
    module: &Arc<ModuleCore>,
    name: &str,
    config_keys: &[&str],
    capacity: usize,
) -> Arc<InputShared> {
    let (tx, rx) = queue::bounded(capacity);
    Arc::new(InputShared {
        module: Arc::downgrade(module),
        module_name: module.name().to_string(),
        name: name.to_string(),
        type_id: TypeId::of::<T>(),
        type_name: std::any::type_name::<T>(),
        config_keys: config_keys.iter().map(|s| s.to_string()).collect(),
        tx,
        rx: Mutex::new(Some(rx)),
        handler: Mutex::new(None),
        working: std::sync::atomic::AtomicBool::new(false),
        upstream: Mutex::new(Vec::new()),
        relays: Mutex::new(Vec::new()),
    })
}

pub(crate) fn new_output_shared<T: Payload>(
    module: &Arc<ModuleCore>,
    name: &str,
    config_keys: &[&str],
) -> Arc<OutputShared> {
    Arc::new(OutputShared {
        module: Arc::downgrade(module),
        module_name: module.name().to_string(),
        name: name.to_string(),
        type_id: TypeId::of::<T>(),
        type_name: std::any::type_name::<T>(),
        config_keys: config_keys.iter().map(|s| s.to_string()).collect(),
        connections: Mutex::new(Vec::new()),
        relays: Mutex::new(Vec::new()),
    })
}
