use proc_macro::TokenStream;
use quote::quote;
use syn::{
    FnArg,
    ItemFn,
    LitInt,
    parse::Parser,
};

/// Use as `#[coordinator_macro::test_runtime]` to run an async test on a fresh
/// deterministic `TestRuntime`:
///
/// ```ignore
/// #[coordinator_macro::test_runtime]
/// async fn test_dispatch(rt: TestRuntime) -> anyhow::Result<()> {
///     let now = rt.unix_timestamp();
///     Ok(())
/// }
/// ```
///
/// `#[coordinator_macro::test_runtime(seed = 7)]` seeds the runtime's rng.
#[proc_macro_attribute]
pub fn test_runtime(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut seed: u64 = 0;
    let attr_parser = syn::meta::parser(|meta| {
        if meta.path.is_ident("seed") {
            let lit: LitInt = meta.value()?.parse()?;
            seed = lit.base10_parse()?;
            Ok(())
        } else {
            Err(meta.error("unsupported test_runtime argument"))
        }
    });
    if let Err(e) = attr_parser.parse(attr) {
        return e.to_compile_error().into();
    }

    let ast: ItemFn = match syn::parse(item) {
        Ok(ast) => ast,
        Err(e) => return e.to_compile_error().into(),
    };
    let sig = &ast.sig;
    let name = &sig.ident;
    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(sig, "#[test_runtime] only works on async functions")
            .to_compile_error()
            .into();
    }
    let output = &sig.output;
    let Some(FnArg::Typed(_)) = sig.inputs.first() else {
        return syn::Error::new_spanned(
            sig,
            format!("#[test_runtime] requires `{name}` to have `rt: TestRuntime` as the first arg"),
        )
        .to_compile_error()
        .into();
    };
    let attrs = ast.attrs.iter();
    let expanded = quote! {
        #[test]
        #( #attrs )*
        fn #name() #output {
            #ast
            // Set a consistent thread stack size regardless of environment.
            let builder = std::thread::Builder::new().stack_size(
                *::common::knobs::RUNTIME_STACK_SIZE);
            let handler = builder
                .spawn(|| {
                    ::cmd_util::env::config_test();
                    let __test_driver =
                        ::common::runtime::testing::TestDriver::new_with_seed(#seed);
                    let rt = __test_driver.rt();
                    let test_future = #name(rt);
                    __test_driver.run_until(test_future)
                })
                .unwrap();
            match handler.join() {
                Ok(r) => r,
                Err(e) => ::std::panic::resume_unwind(e),
            }
        }
    };
    expanded.into()
}
