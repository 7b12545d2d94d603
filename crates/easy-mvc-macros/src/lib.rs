use proc_macro::TokenStream;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::{
    parse_macro_input, Attribute, FnArg, Ident, ImplItem, ImplItemFn, ItemImpl, LitStr, Meta,
    ReturnType, Type,
};

/// One `#[action]` method, ready to be registered.
struct DeclaredAction {
    name: LitStr,
    method: Ident,
    args: Vec<Type>,
    output: Type,
}

/// Reads `#[action]` or `#[action(name = "...")]`, defaulting the name to
/// the method name.
fn action_name(attr: &Attribute, method: &Ident) -> syn::Result<LitStr> {
    let mut name = LitStr::new(&method.to_string(), method.span());
    if matches!(attr.meta, Meta::Path(_)) {
        return Ok(name);
    }
    attr.parse_nested_meta(|meta| {
        if meta.path.is_ident("name") {
            name = meta.value()?.parse()?;
            Ok(())
        } else {
            Err(meta.error("unsupported action attribute, expected `name = \"...\"`"))
        }
    })?;
    Ok(name)
}

fn is_action_attr(attr: &Attribute) -> bool {
    attr.path().is_ident("action")
}

/// Strips the `#[action]` attribute from `method` and describes it.
fn take_action(method: &mut ImplItemFn) -> syn::Result<Option<DeclaredAction>> {
    let Some(index) = method.attrs.iter().position(is_action_attr) else {
        return Ok(None);
    };
    let attr = method.attrs.remove(index);
    if let Some(extra) = method.attrs.iter().find(|attr| is_action_attr(attr)) {
        return Err(syn::Error::new_spanned(extra, "duplicate `#[action]` attribute"));
    }
    let sig = &method.sig;
    if !sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &sig.generics,
            "action methods cannot be generic",
        ));
    }
    if sig.asyncness.is_some() {
        return Err(syn::Error::new_spanned(
            sig.asyncness,
            "action methods are synchronous; return a future or use `cancelable` instead",
        ));
    }

    let mut inputs = sig.inputs.iter();
    match inputs.next() {
        Some(FnArg::Typed(_)) => {}
        Some(FnArg::Receiver(receiver)) => {
            return Err(syn::Error::new_spanned(
                receiver,
                "action methods take `node: &NodeRef<Self>` instead of a receiver",
            ));
        }
        None => {
            return Err(syn::Error::new_spanned(
                sig,
                "action methods take `node: &NodeRef<Self>` as their first argument",
            ));
        }
    }
    let mut args = Vec::new();
    for input in inputs {
        match input {
            FnArg::Typed(pat_type) => args.push((*pat_type.ty).clone()),
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new_spanned(receiver, "unexpected receiver"));
            }
        }
    }
    let output: Type = match &sig.output {
        ReturnType::Default => syn::parse_quote! { () },
        ReturnType::Type(_, ty) => ty.as_ref().clone(),
    };

    Ok(Some(DeclaredAction {
        name: action_name(&attr, &sig.ident)?,
        method: sig.ident.clone(),
        args,
        output,
    }))
}

/// The registration call for one action. Zero arguments take `()`, one
/// argument is passed as is, more are packed into a tuple.
fn registration(action: &DeclaredAction) -> TokenStream2 {
    let DeclaredAction {
        name,
        method,
        args,
        output,
    } = action;
    let idents: Vec<Ident> = (0..args.len())
        .map(|index| Ident::new(&format!("__arg{}", index), Span::call_site()))
        .collect();
    let (pattern, args_ty) = match args.as_slice() {
        [] => (quote! { () }, quote! { () }),
        [ty] => {
            let ident = &idents[0];
            (quote! { #ident }, quote! { #ty })
        }
        _ => (quote! { ( #(#idents),* ) }, quote! { ( #(#args),* ) }),
    };
    quote! {
        table.action(
            #name,
            |__node: &::easy_mvc_core::NodeRef<Self>, #pattern: #args_ty| -> #output {
                Self::#method(__node #(, #idents)*)
            },
        );
    }
}

/// Collects the `#[action]` methods of an inherent controller impl.
///
/// Each marked method has the shape `fn name(node: &NodeRef<Self>, ...)`.
/// The attribute adds `register_declared_actions`, which
/// `Controller::register_actions` calls to fill the dispatch table.
#[proc_macro_attribute]
pub fn actions(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr_tokens = TokenStream2::from(attr);
    if !attr_tokens.is_empty() {
        return syn::Error::new_spanned(attr_tokens, "`#[actions]` takes no arguments")
            .to_compile_error()
            .into();
    }

    let mut block = parse_macro_input!(item as ItemImpl);
    if let Some((_, path, _)) = &block.trait_ {
        return syn::Error::new_spanned(path, "`#[actions]` goes on an inherent impl")
            .to_compile_error()
            .into();
    }

    let mut declared = Vec::new();
    let mut errors: Option<syn::Error> = None;
    for item in &mut block.items {
        let ImplItem::Fn(method) = item else {
            continue;
        };
        match take_action(method) {
            Ok(Some(action)) => declared.push(action),
            Ok(None) => {}
            Err(err) => {
                errors = Some(match errors.take() {
                    Some(mut all) => {
                        all.combine(err);
                        all
                    }
                    None => err,
                });
            }
        }
    }
    if let Some(errors) = errors {
        return errors.to_compile_error().into();
    }

    let registrations: Vec<TokenStream2> = declared.iter().map(registration).collect();
    let self_ty = &block.self_ty;
    let (impl_generics, _ty_generics, where_clause) = block.generics.split_for_impl();
    TokenStream::from(quote! {
        #block

        impl #impl_generics #self_ty #where_clause {
            /// Registers every `#[action]` method of this impl.
            #[allow(unused_variables)]
            pub fn register_declared_actions(table: &mut ::easy_mvc_core::ActionTable<Self>) {
                #(#registrations)*
            }
        }
    })
}
