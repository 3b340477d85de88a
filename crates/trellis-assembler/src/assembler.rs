use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value as Json;
use tracing::{debug, info, warn};
use trellis_store::{StoreError, StoreResult};

use crate::component::ComponentRef;
use crate::context::Context;
use crate::error::{AssembleError, AssembleResult};
use crate::instance::{ComponentHandle, Instance, LazyInstance};
use crate::value::{collect_dependencies, merge_layer, render_path, Config, Dependency, Segment, Value};

/// Builds instance graphs from declarative configuration.
///
/// Nested instances are discovered breadth first. Every other dependency
/// of an instance is resolved concurrently before the next instance in the
/// queue is built. Once the whole graph exists, lifecycle hooks run: `init`
/// in discovery order, `ready` children first, and `start` for instances
/// requested with `start`, in ready order.
#[derive(Clone, Debug)]
pub struct Assembler {
    context: Arc<Context>,
}

impl Assembler {
    /// Create an assembler building instances in `context`.
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }

    /// Context shared by every instance this assembler builds.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Build an instance of `component` with `config` layered over the
    /// component's defaults.
    pub async fn instance(&self, component: impl Into<ComponentRef>, config: Config) -> AssembleResult<Arc<Instance>> {
        self.run(component.into(), vec![config], None, false).await
    }

    /// Like [`instance`](Self::instance), then run the `start` hook.
    pub async fn start(&self, component: impl Into<ComponentRef>, config: Config) -> AssembleResult<Arc<Instance>> {
        self.run(component.into(), vec![config], None, true).await
    }

    /// Register `component` (or resolve it, for an index or manifest URL)
    /// and return a handle whose instances take `default_config` under
    /// their own configuration.
    pub async fn register(
        &self,
        component: impl Into<ComponentRef>,
        default_config: Config,
    ) -> AssembleResult<ComponentHandle> {
        let definition = self.context.components().resolve(&component.into()).await?;
        Ok(ComponentHandle::new(
            definition,
            default_config,
            Weak::new(),
            Arc::clone(&self.context),
        ))
    }

    pub(crate) fn run(
        &self,
        component: ComponentRef,
        layers: Vec<Config>,
        parent: Option<Arc<Instance>>,
        start: bool,
    ) -> BoxFuture<'static, AssembleResult<Arc<Instance>>> {
        let context = Arc::clone(&self.context);
        async move {
            let mut run = Run {
                context,
                queue: VecDeque::new(),
                nodes: Vec::new(),
            };
            run.queue.push_back(Job {
                component,
                layers,
                parent,
                slot: None,
                start,
            });
            run.execute().await
        }
        .boxed()
    }
}

/// An instance waiting to be built.
struct Job {
    component: ComponentRef,
    layers: Vec<Config>,
    parent: Option<Arc<Instance>>,
    /// Node and path the built instance is spliced into.
    slot: Option<(usize, Vec<Segment>)>,
    start: bool,
}

struct Node {
    instance: Arc<Instance>,
    parent: Option<usize>,
    start: bool,
}

/// State of one assembly.
struct Run {
    context: Arc<Context>,
    queue: VecDeque<Job>,
    nodes: Vec<Node>,
}

impl Run {
    async fn execute(mut self) -> AssembleResult<Arc<Instance>> {
        while let Some(job) = self.queue.pop_front() {
            self.build(job).await?;
        }
        let Some(root) = self.nodes.first().map(|node| Arc::clone(&node.instance)) else {
            return Err(AssembleError::Unavailable("empty assembly".into()));
        };

        for node in &self.nodes {
            node.instance.init_once().await?;
        }
        let order = self.ready_order();
        for &i in &order {
            self.nodes[i].instance.ready_once().await?;
        }
        for &i in &order {
            if self.nodes[i].start {
                self.nodes[i].instance.start_once().await?;
            }
        }

        info!(instance = %root.index(), instances = self.nodes.len(), "assembled");
        Ok(root)
    }

    /// Post-order over the discovery tree: children before parents,
    /// siblings in discovery order.
    fn ready_order(&self) -> Vec<usize> {
        let mut children = vec![Vec::new(); self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                children[parent].push(i);
            }
        }
        let mut order = Vec::with_capacity(self.nodes.len());
        // (node, children visited)
        let mut stack = vec![(0usize, false)];
        while let Some((i, expanded)) = stack.pop() {
            if expanded {
                order.push(i);
            } else {
                stack.push((i, true));
                stack.extend(children[i].iter().rev().map(|&c| (c, false)));
            }
        }
        order
    }

    async fn build(&mut self, job: Job) -> AssembleResult<()> {
        let definition = self.context.components().resolve(&job.component).await?;

        let mut config = Config::new();
        let defaults = definition
            .default_config()
            .iter()
            .map(|(k, v)| (k.clone(), Value::parse(v)))
            .collect();
        merge_layer(&mut config, defaults);
        for layer in job.layers {
            merge_layer(&mut config, layer);
        }

        let instance = Arc::new(Instance::new(definition, config, job.parent.as_ref()));
        let node = self.nodes.len();
        let parent_node = job.slot.as_ref().map(|(parent, _)| *parent);
        if let Some((parent, path)) = &job.slot {
            self.nodes[*parent]
                .instance
                .splice(path, Value::Instance(Arc::clone(&instance)));
        }
        self.nodes.push(Node {
            instance: Arc::clone(&instance),
            parent: parent_node,
            start: job.start,
        });
        debug!(instance = %instance.index(), "instance created");

        let (public, private) = instance.snapshot();
        let mut found = Vec::new();
        for (name, value) in public.iter().chain(private.iter()) {
            collect_dependencies(value, &mut vec![Segment::Field(name.clone())], &mut found);
        }

        let mut immediate = Vec::new();
        for (path, dependency) in found {
            let start = matches!(dependency, Dependency::Start { .. });
            match dependency {
                Dependency::Instance { component, config } | Dependency::Start { component, config } => {
                    self.queue.push_back(Job {
                        component,
                        layers: vec![config],
                        parent: Some(Arc::clone(&instance)),
                        slot: Some((node, path)),
                        start,
                    });
                }
                Dependency::Proxy { component, config } => {
                    let lazy = LazyInstance::new(
                        component,
                        config,
                        Arc::downgrade(&instance),
                        Arc::clone(&self.context),
                    );
                    instance.splice(&path, Value::Lazy(lazy));
                }
                other => immediate.push((path, other)),
            }
        }

        let context = &self.context;
        let owner = &instance;
        let resolved = try_join_all(immediate.into_iter().map(|(path, dependency)| async move {
            let value = resolve(context, owner, &path, dependency).await?;
            Ok::<_, AssembleError>((path, value))
        }))
        .await?;
        for (path, value) in resolved {
            instance.splice(&path, value);
        }
        Ok(())
    }
}

/// Resolve a dependency that does not create an instance.
async fn resolve(
    context: &Arc<Context>,
    instance: &Arc<Instance>,
    path: &[Segment],
    dependency: Dependency,
) -> AssembleResult<Value> {
    let slot = || format!("{}.{}", instance.index(), render_path(path));
    let store_error = |source: StoreError| AssembleError::Store { path: slot(), source };
    debug!(instance = %instance.index(), slot = %render_path(path), kind = dependency.kind(), "resolving");

    match dependency {
        Dependency::Load(spec) => context
            .loader()
            .load(spec)
            .await
            .map(Value::Resource)
            .map_err(|source| AssembleError::Load { path: slot(), source }),
        Dependency::Component { component, config } => {
            let definition = context.components().resolve(&component).await?;
            Ok(Value::Component(ComponentHandle::new(
                definition,
                config,
                Arc::downgrade(instance),
                Arc::clone(context),
            )))
        }
        Dependency::Store(settings) => context.stores().store(&settings).await.map(Value::Store).map_err(store_error),
        Dependency::Get { settings, query } => {
            let store = context.stores().store(&settings).await.map_err(store_error)?;
            data(&slot(), store.fetch(query).await.map(|fetched| fetched.to_json())).map_err(store_error)
        }
        Dependency::Set { settings, dataset } => {
            let store = context.stores().store(&settings).await.map_err(store_error)?;
            data(&slot(), store.set(dataset).await.map(Json::Object)).map_err(store_error)
        }
        Dependency::Del { settings, key } => {
            let store = context.stores().store(&settings).await.map_err(store_error)?;
            let removed = store.del(key).await.map(|gone| gone.map(Json::Object).unwrap_or(Json::Null));
            data(&slot(), removed).map_err(store_error)
        }
        Dependency::Instance { .. } | Dependency::Start { .. } | Dependency::Proxy { .. } => {
            Err(AssembleError::Unavailable(slot()))
        }
    }
}

/// Data results are plain values. A malformed key leaves the slot empty.
fn data(slot: &str, result: StoreResult<Json>) -> StoreResult<Value> {
    match result {
        Ok(json) => Ok(Value::plain(json)),
        Err(StoreError::InvalidKey(key)) => {
            warn!(slot, key = %key, "invalid dataset key, leaving slot empty");
            Ok(Value::Null)
        }
        Err(e) => Err(e),
    }
}
