//! Functions callable from programs, and their registry.

use std::{collections::hash_map::RandomState, fmt, sync::Arc};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use tracing::trace;

use crate::{
    config,
    error::{Error, ExecResult},
    exec::ExecCtx,
    types::{cast, DataType, Value},
    util::cache::Cache,
};

mod standard;

pub type SyncBody = Arc<dyn Fn(&[Value]) -> ExecResult<Value> + Send + Sync>;

pub type AsyncBody = Arc<
    dyn for<'a> Fn(&'a mut ExecCtx, Vec<Value>) -> BoxFuture<'a, ExecResult<Value>> + Send + Sync,
>;

#[derive(Clone)]
pub enum FunctionBody {
    Sync(SyncBody),
    /// Bodies needing the execution context, e.g., to pull rows.
    Async(AsyncBody),
}

#[derive(Debug, Clone)]
pub struct FunctionArgument {
    pub name: String,
    pub ty: DataType,
    /// Used when the call leaves the argument out.
    pub default: Option<Value>,
}

/// A function signature with its body.
pub struct Function {
    name: String,
    arguments: Vec<FunctionArgument>,
    /// The last argument may be repeated.
    variadic: bool,
    return_type: DataType,
    /// Free of external effects, thus allowed in safe mode.
    safe: bool,
    body: FunctionBody,
}

impl Function {
    pub fn builder(name: &str) -> FunctionBuilder {
        FunctionBuilder {
            name: name.to_owned(),
            arguments: Vec::new(),
            variadic: false,
            return_type: DataType::Dynamic,
            safe: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[FunctionArgument] {
        &self.arguments
    }

    pub fn return_type(&self) -> DataType {
        self.return_type
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    fn required(&self) -> usize {
        self.arguments
            .iter()
            .take_while(|arg| arg.default.is_none())
            .count()
    }

    fn param_type(&self, index: usize) -> DataType {
        let arg = match self.arguments.get(index) {
            Some(arg) => Some(arg),
            None if self.variadic => self.arguments.last(),
            None => None,
        };
        arg.map_or(DataType::Dynamic, |arg| arg.ty)
    }

    fn accepts_count(&self, count: usize) -> bool {
        count >= self.required() && (self.variadic || count <= self.arguments.len())
    }

    /// Scores how well the argument kinds fit, lower being better. `None` if
    /// they don't fit at all.
    fn score(&self, kinds: &[DataType]) -> Option<u32> {
        if !self.accepts_count(kinds.len()) {
            return None;
        }
        kinds.iter().enumerate().try_fold(0, |total, (i, &kind)| {
            let param = self.param_type(i);
            let score = if kind == param {
                0
            } else if param == DataType::Dynamic {
                2
            } else if matches!(kind, DataType::Null | DataType::Dynamic) || widens(kind, param) {
                1
            } else {
                return None;
            };
            Some(total + score)
        })
    }

    /// Calls the function, filling the defaults in and converting the
    /// arguments to the declared kinds.
    pub async fn call(&self, ctx: &mut ExecCtx, mut args: Vec<Value>) -> ExecResult<Value> {
        if !self.safe && ctx.options().safe_mode {
            return Err(Error::SafeModeViolation(format!("{}()", self.name).into()));
        }
        if !self.accepts_count(args.len()) && args.len() > self.arguments.len() {
            return Err(Error::ExecError(format!(
                "`{}` takes at most {} arguments, got {}",
                self.name,
                self.arguments.len(),
                args.len()
            )));
        }
        for arg in self.arguments.iter().skip(args.len()) {
            match &arg.default {
                Some(default) => args.push(default.clone()),
                None => {
                    return Err(Error::ExecError(format!(
                        "missing argument `{}` of `{}`",
                        arg.name, self.name
                    )))
                }
            }
        }
        for (i, arg) in args.iter_mut().enumerate() {
            let ty = self.param_type(i);
            if ty.is_static() && !arg.is_null() && arg.data_type() != ty {
                *arg = cast::cast(arg, ty)?;
            }
        }
        trace!(function = %self.name, args = args.len(), "call");
        match &self.body {
            FunctionBody::Sync(body) => body(&args),
            FunctionBody::Async(body) => body(ctx, args).await,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .field("variadic", &self.variadic)
            .field("return_type", &self.return_type)
            .field("safe", &self.safe)
            .finish_non_exhaustive()
    }
}

/// Implicit numeric conversions accepted by overload resolution.
fn widens(from: DataType, to: DataType) -> bool {
    matches!(
        (from, to),
        (DataType::Integer, DataType::Float)
            | (DataType::Integer, DataType::Numeric)
            | (DataType::Numeric, DataType::Float)
    )
}

pub struct FunctionBuilder {
    name: String,
    arguments: Vec<FunctionArgument>,
    variadic: bool,
    return_type: DataType,
    safe: bool,
}

impl FunctionBuilder {
    pub fn arg(mut self, name: &str, ty: DataType) -> FunctionBuilder {
        self.arguments.push(FunctionArgument {
            name: name.to_owned(),
            ty,
            default: None,
        });
        self
    }

    /// Adds an argument that may be left out.
    pub fn optional(mut self, name: &str, ty: DataType, default: impl Into<Value>) -> FunctionBuilder {
        self.arguments.push(FunctionArgument {
            name: name.to_owned(),
            ty,
            default: Some(default.into()),
        });
        self
    }

    /// Lets the last argument repeat.
    pub fn variadic(mut self) -> FunctionBuilder {
        self.variadic = true;
        self
    }

    pub fn returns(mut self, ty: DataType) -> FunctionBuilder {
        self.return_type = ty;
        self
    }

    /// Marks the function as free of external effects.
    pub fn safe(mut self) -> FunctionBuilder {
        self.safe = true;
        self
    }

    pub fn body<F>(self, body: F) -> Function
    where
        F: Fn(&[Value]) -> ExecResult<Value> + Send + Sync + 'static,
    {
        self.build(FunctionBody::Sync(Arc::new(body)))
    }

    pub fn async_body<F>(self, body: F) -> Function
    where
        F: for<'a> Fn(&'a mut ExecCtx, Vec<Value>) -> BoxFuture<'a, ExecResult<Value>>
            + Send
            + Sync
            + 'static,
    {
        self.build(FunctionBody::Async(Arc::new(body)))
    }

    fn build(self, body: FunctionBody) -> Function {
        Function {
            name: self.name,
            arguments: self.arguments,
            variadic: self.variadic,
            return_type: self.return_type,
            safe: self.safe,
            body,
        }
    }
}

type ResolutionKey = (String, Vec<DataType>);

/// Functions by name, with their overloads in registration order.
///
/// Shared by the execution threads. Resolutions are cached until the next
/// registration.
pub struct FunctionRegistry {
    functions: DashMap<String, Vec<Arc<Function>>>,
    resolutions: Cache<ResolutionKey, Arc<Function>>,
}

impl Default for FunctionRegistry {
    fn default() -> FunctionRegistry {
        FunctionRegistry::new()
    }
}

impl FunctionRegistry {
    /// Constructs an empty registry.
    pub fn new() -> FunctionRegistry {
        FunctionRegistry {
            functions: DashMap::new(),
            resolutions: Cache::new(config::RESOLUTION_CACHE_CAPACITY, RandomState::new()),
        }
    }

    /// Constructs a registry holding the standard functions.
    pub fn standard() -> FunctionRegistry {
        let registry = FunctionRegistry::new();
        standard::register_all(&registry);
        registry
    }

    /// Adds an overload.
    pub fn register(&self, function: Function) {
        self.functions
            .entry(function.name.to_ascii_lowercase())
            .or_default()
            .push(Arc::new(function));
        self.resolutions.clear();
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_lowercase())
    }

    /// Picks the overload fitting `kinds` best.
    ///
    /// Ties fail with [`Error::AmbiguousOverload`], unless they come from
    /// null arguments only: then the first registered overload wins.
    pub fn find(&self, name: &str, kinds: &[DataType]) -> ExecResult<Arc<Function>> {
        let not_found = || Error::FunctionNotFound(signature(name, kinds));
        let overloads = self
            .functions
            .get(&name.to_ascii_lowercase())
            .ok_or_else(not_found)?;

        let mut best: Option<(u32, &Arc<Function>)> = None;
        let mut tied = false;
        for function in overloads.iter() {
            let Some(score) = function.score(kinds) else {
                continue;
            };
            match best {
                Some((top, _)) if score > top => {}
                Some((top, _)) if score == top => tied = true,
                _ => {
                    best = Some((score, function));
                    tied = false;
                }
            }
        }

        let Some((_, function)) = best else {
            return Err(not_found());
        };
        let only_nulls = kinds.contains(&DataType::Null) && !kinds.contains(&DataType::Dynamic);
        if tied && !only_nulls {
            return Err(Error::AmbiguousOverload(signature(name, kinds)));
        }
        Ok(Arc::clone(function))
    }

    /// Same as [`Self::find`], cached.
    pub async fn resolve(&self, name: &str, kinds: &[DataType]) -> ExecResult<Arc<Function>> {
        let key = (name.to_ascii_lowercase(), kinds.to_vec());
        self.resolutions
            .load(key, async { self.find(name, kinds) })
            .await
    }
}

fn signature(name: &str, kinds: &[DataType]) -> String {
    let kinds: Vec<_> = kinds.iter().map(|kind| kind.name()).collect();
    format!("{name}({})", kinds.join(", "))
}
