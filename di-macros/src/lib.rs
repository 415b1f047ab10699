//! Derive macros for compile-time dependency injection.
//!
//! - `#[derive(Context)]` makes every field of a context struct extractable
//! - `#[derive(FromContext)]` builds a service by extracting each of its fields
//!
//! Generated code refers to `crate::FromRef`, so the consuming crate must
//! re-export the trait at its root.

use proc_macro::TokenStream;

mod context;
mod fields;
mod from_context;

/// Generates `FromRef<Self>` for the type of every field.
///
/// All field types must implement `Clone` and be pairwise distinct.
///
/// ```ignore
/// #[derive(Context, Clone)]
/// pub struct Context {
///     pub store: AppStore,
///     pub schema: Arc<SchemaConfig>,
/// }
///
/// // impl FromRef<Context> for AppStore { ... }
/// // impl FromRef<Context> for Arc<SchemaConfig> { ... }
/// ```
#[proc_macro_derive(Context)]
pub fn derive_context(input: TokenStream) -> TokenStream {
    context::derive_context_impl(input)
}

/// Generates `FromRef<Context>` for a struct by resolving each field.
///
/// Fields may themselves be `FromContext` services, so services compose.
/// The context type defaults to `Context` in scope at the derive site and
/// can be overridden with `#[from_context(Context = "path::To::Ctx")]`.
///
/// ```ignore
/// #[derive(FromContext, Clone)]
/// pub struct RelationImporter {
///     store: AppStore,
///     validator: RelationValidator,
/// }
///
/// let importer = RelationImporter::from_ref(&ctx);
/// ```
#[proc_macro_derive(FromContext, attributes(from_context))]
pub fn derive_from_context(input: TokenStream) -> TokenStream {
    from_context::derive_from_context_impl(input)
}
