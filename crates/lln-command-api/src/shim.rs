//! Native shim generation.
//!
//! The shim is a small, self-contained C translation unit that exposes the
//! registered commands under the engine's plugin ABI. Each command gets a
//! trampoline whose address the engine carries back in every record; the
//! bridge only compares those addresses and never runs the trampolines.

use crate::registry::CommandRegistry;
use lln_runtime::ArgType;

/// Version of the generated layout. Part of the fingerprint.
pub const SHIM_FORMAT_VERSION: u32 = 1;

const PRELUDE: &str = r#"#include <stdbool.h>
#include <stddef.h>
#include <stdint.h>

typedef enum { ARG_INT, ARG_FLT, ARG_STR, ARG_BOOL, ARG_COUNT } lln_ArgType;
typedef struct { lln_ArgType *items; size_t count; size_t capacity; } lln_ArgTypes;
typedef union { int i; float f; bool b; char *s; } lln_ArgValue;
typedef struct { lln_ArgType type; lln_ArgValue value; } lln_Arg;
typedef struct { lln_Arg *items; size_t count; size_t capacity; } lln_Args;
typedef void *(*lln_CommandFnPtr)(lln_Args);
typedef struct { const char *name; lln_ArgTypes signature; lln_CommandFnPtr fnptr; } lln_Callable;
typedef struct {
    lln_Callable *items;
    size_t count;
    size_t capacity;
    void (*pre)(void);
    void (*post)(void);
} lln_Callables;

#if defined(_WIN32)
#define LLN_HOST_EXPORT __declspec(dllexport)
#else
#define LLN_HOST_EXPORT __attribute__((visibility("default")))
#endif
"#;

/// Emit the shim source for `registry`.
///
/// Output depends only on the command names and parameter types, in
/// registration order.
pub fn generate(registry: &CommandRegistry) -> String {
    let commands = registry.commands();
    let mut out = String::new();

    out.push_str("/* Generated by lln-host. Do not edit. */\n");
    out.push_str(&format!(
        "/* shim format {}, {} commands */\n\n",
        SHIM_FORMAT_VERSION,
        commands.len()
    ));
    out.push_str(PRELUDE);

    for (i, spec) in commands.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("/* {} */\n", spec.signature()));
        write_signature(&mut out, i, &spec.params);
        write_trampoline(&mut out, i, &spec.params);
    }

    out.push('\n');
    write_table(&mut out, registry);
    out
}

fn signature_ident(index: usize) -> String {
    format!("lln_host_sign_{}", index)
}

/// Name of the trampoline for command `index`.
pub fn trampoline_ident(index: usize) -> String {
    format!("lln_host_cmd_{}", index)
}

fn write_signature(out: &mut String, index: usize, params: &[ArgType]) {
    // C forbids empty initializer lists; parameterless commands use NULL.
    if params.is_empty() {
        return;
    }
    let tags: Vec<&str> = params.iter().map(|p| p.c_tag()).collect();
    out.push_str(&format!(
        "static lln_ArgType {}[] = {{ {} }};\n",
        signature_ident(index),
        tags.join(", ")
    ));
}

fn write_trampoline(out: &mut String, index: usize, params: &[ArgType]) {
    out.push_str(&format!("static void *{}(lln_Args args) {{\n", trampoline_ident(index)));
    if params.is_empty() {
        out.push_str("    (void)args;\n");
    }
    for (j, ty) in params.iter().enumerate() {
        out.push_str(&format!(
            "    {} a{} = args.items[{}].value.{};\n",
            ty.c_type(),
            j,
            j,
            ty.c_member()
        ));
        out.push_str(&format!("    (void)a{};\n", j));
    }
    // Distinct return values keep identical bodies from being folded.
    out.push_str(&format!("    return (void *)(uintptr_t){};\n", index + 1));
    out.push_str("}\n");
}

fn write_table(out: &mut String, registry: &CommandRegistry) {
    let commands = registry.commands();

    if commands.is_empty() {
        out.push_str("static lln_Callable lln_host_items[1];\n");
    } else {
        out.push_str("static lln_Callable lln_host_items[] = {\n");
        for (i, spec) in commands.iter().enumerate() {
            let signature = if spec.params.is_empty() {
                "NULL".to_string()
            } else {
                signature_ident(i)
            };
            out.push_str(&format!(
                "    {{ \"{}\", {{ {}, {}, {} }}, {} }},\n",
                spec.name,
                signature,
                spec.params.len(),
                spec.params.len(),
                trampoline_ident(i)
            ));
        }
        out.push_str("};\n");
    }

    let count = commands.len();
    out.push('\n');
    out.push_str("LLN_HOST_EXPORT lln_Callables __lln_preproc_callables = { NULL, 0, 0, NULL, NULL };\n\n");
    out.push_str("LLN_HOST_EXPORT void __lln_preproc_register_commands(void) {\n");
    out.push_str("    __lln_preproc_callables.items = lln_host_items;\n");
    out.push_str(&format!("    __lln_preproc_callables.count = {};\n", count));
    out.push_str(&format!("    __lln_preproc_callables.capacity = {};\n", count));
    out.push_str("}\n");
}
