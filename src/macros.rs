/// Register async functions of the current file as procedures.
///
/// Each function is recorded with `file!()` and its name; a
/// [`Registry`](crate::procedure::Registry) discovers it when the file
/// matches the registry's include patterns.
///
/// ```ignore
/// pub async fn login(username: String) -> String { username }
/// pub async fn logout() {}
///
/// seamless_rpc::procedure!(login, logout);
/// ```
#[macro_export]
macro_rules! procedure {
    ($($name:ident),+ $(,)?) => {
        $(
            $crate::inventory::submit! {
                $crate::procedure::ProcedureDef::new(file!(), stringify!($name), {
                    fn factory() -> ::std::sync::Arc<dyn $crate::procedure::Handler> {
                        $crate::procedure::TypedHandler::arc($name)
                    }
                    factory
                })
            }
        )+
    };
}

/// Generate a typed client stub for the procedures of one source file.
///
/// The path is the file's path relative to the server's root directory. Each
/// method serializes its arguments positionally and converts the reply with
/// [`FromReply`](crate::client::FromReply).
///
/// ```ignore
/// seamless_rpc::rpc_client! {
///     pub struct Chat from "components/chat_server.rs" {
///         async fn login(username: String) -> String;
///         async fn messages() -> RpcStream<String>;
///     }
/// }
///
/// let chat = Chat::new(client);
/// let name = chat.login("ada".into()).await?;
/// ```
#[macro_export]
macro_rules! rpc_client {
    (
        $(#[$meta:meta])*
        $vis:vis struct $client:ident from $path:literal {
            $(
                $(#[$fn_meta:meta])*
                async fn $name:ident($($arg:ident : $arg_ty:ty),* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug)]
        $vis struct $client {
            client: $crate::client::RpcClient,
        }

        impl $client {
            /// Source path the procedures are exported from.
            pub const PATH: &'static str = $path;

            /// Wrap a client.
            pub fn new(client: $crate::client::RpcClient) -> Self {
                Self { client }
            }

            $(
                $(#[$fn_meta])*
                pub async fn $name(&self, $($arg: $arg_ty),*) -> $crate::Result<$ret> {
                    let args: ::std::vec::Vec<$crate::serde_json::Value> =
                        vec![$($crate::codec::JsonCodec::to_value(&$arg)?),*];
                    self.client
                        .procedure(Self::PATH, stringify!($name))
                        .invoke(args)
                        .await
                }
            )*
        }
    };
}
