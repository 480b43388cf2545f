//! Typed procedures behind an object-safe handler.
//!
//! Any `async fn(A1, ..., An) -> R` with up to eight `DeserializeOwned`
//! parameters and an [`IntoOutcome`] result is a procedure. Positional JSON
//! arguments are decoded in order; missing trailing arguments decode from
//! `null` and surplus ones are ignored.
//!
//! # Example
//!
//! ```
//! use seamless_rpc::procedure::{Handler, Outcome, TypedHandler};
//! use serde_json::json;
//!
//! async fn add(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let handler = TypedHandler::arc(add);
//! match handler.call(vec![json!(2), json!(3)]).await.unwrap() {
//!     Outcome::Value(value) => assert_eq!(value, json!(5)),
//!     _ => unreachable!(),
//! }
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use super::{ProcedureError, RpcError};
use crate::codec::Json;
use crate::stream::{EventStream, ValueStream};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of invoking a procedure.
pub type ProcedureResult = Result<Outcome, ProcedureError>;

/// What a procedure produced, before it is written to the wire.
pub enum Outcome {
    /// A JSON value (HTTP 200, JSON body).
    Value(Value),
    /// No value (HTTP 204).
    Empty,
    /// A stream of JSON values (Server-Sent Events).
    Stream(ValueStream),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Outcome::Empty => f.write_str("Empty"),
            Outcome::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Conversion from a procedure's return value into an [`Outcome`].
pub trait IntoOutcome {
    /// Convert, failing if the value cannot be serialized.
    fn into_outcome(self) -> ProcedureResult;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> ProcedureResult {
        Ok(self)
    }
}

impl IntoOutcome for () {
    fn into_outcome(self) -> ProcedureResult {
        Ok(Outcome::Empty)
    }
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> ProcedureResult {
        Ok(Outcome::Value(self))
    }
}

fn serialize<T: Serialize>(value: &T) -> ProcedureResult {
    Ok(Outcome::Value(serde_json::to_value(value)?))
}

impl<T: Serialize> IntoOutcome for Json<T> {
    fn into_outcome(self) -> ProcedureResult {
        serialize(&self.0)
    }
}

/// `None` is JSON `null`, not an empty response.
impl<T: Serialize> IntoOutcome for Option<T> {
    fn into_outcome(self) -> ProcedureResult {
        serialize(&self)
    }
}

impl<T: Serialize> IntoOutcome for Vec<T> {
    fn into_outcome(self) -> ProcedureResult {
        serialize(&self)
    }
}

macro_rules! impl_into_outcome_serialize {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoOutcome for $ty {
                fn into_outcome(self) -> ProcedureResult {
                    serialize(&self)
                }
            }
        )*
    };
}

impl_into_outcome_serialize!(
    String, &'static str, bool, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
    f32, f64,
);

impl<T> IntoOutcome for EventStream<T>
where
    T: Serialize + Send + 'static,
{
    fn into_outcome(self) -> ProcedureResult {
        Ok(Outcome::Stream(self.into_value_stream()))
    }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Into<ProcedureError>,
{
    fn into_outcome(self) -> ProcedureResult {
        match self {
            Ok(value) => value.into_outcome(),
            Err(err) => Err(err.into()),
        }
    }
}

/// Type-erased procedure.
pub trait Handler: Send + Sync + 'static {
    /// Invoke with positional JSON arguments.
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, ProcedureResult>;
}

/// Async functions usable as procedures, keyed by their argument tuple.
pub trait ProcedureFn<Args>: Send + Sync + 'static {
    /// Decode `args` and run the function.
    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, ProcedureResult>;
}

/// Decode the next positional argument, treating a missing one as `null`.
fn decode_arg<T, I>(args: &mut I, index: usize) -> Result<T, RpcError>
where
    T: DeserializeOwned,
    I: Iterator<Item = Value>,
{
    let value = args.next().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|err| {
        RpcError::validation(json!({
            "argument": index,
            "message": err.to_string(),
        }))
    })
}

macro_rules! impl_procedure_fn {
    ($($ty:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
        impl<F, Fut, R, $($ty,)*> ProcedureFn<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: IntoOutcome,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, ProcedureResult> {
                let mut args = args.into_iter();
                let mut index = 0usize;
                $(
                    let $ty: $ty = match decode_arg(&mut args, index) {
                        Ok(value) => value,
                        Err(err) => {
                            let result: ProcedureResult = Err(err.into());
                            return Box::pin(std::future::ready(result));
                        }
                    };
                    index += 1;
                )*
                let fut = (self)($($ty),*);
                Box::pin(async move { fut.await.into_outcome() })
            }
        }
    };
}

impl_procedure_fn!();
impl_procedure_fn!(A1);
impl_procedure_fn!(A1, A2);
impl_procedure_fn!(A1, A2, A3);
impl_procedure_fn!(A1, A2, A3, A4);
impl_procedure_fn!(A1, A2, A3, A4, A5);
impl_procedure_fn!(A1, A2, A3, A4, A5, A6);
impl_procedure_fn!(A1, A2, A3, A4, A5, A6, A7);
impl_procedure_fn!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Wrapper that decodes positional arguments before calling the function.
pub struct TypedHandler<F, Args> {
    handler: F,
    _phantom: PhantomData<fn(Args)>,
}

impl<F, Args> TypedHandler<F, Args>
where
    F: ProcedureFn<Args>,
    Args: 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }

    /// Create a typed handler already erased behind [`Handler`].
    pub fn arc(handler: F) -> Arc<dyn Handler> {
        Arc::new(Self::new(handler))
    }
}

impl<F, Args> Handler for TypedHandler<F, Args>
where
    F: ProcedureFn<Args>,
    Args: 'static,
{
    fn call(&self, args: Vec<Value>) -> BoxFuture<'static, ProcedureResult> {
        self.handler.invoke(args)
    }
}
