//! C header generation from module tags.

use std::fmt::Write;

use crate::emitter::ModuleEmitter;
use crate::metadata::DECLARE_IN_HEADER_TAG;

/// Render a C header declaring everything tagged for the header.
///
/// Module-level declare-in-header values become opaque struct typedefs;
/// tagged functions become `void` prototypes.
pub fn write_header(module: &dyn ModuleEmitter) -> String {
    let mut out = String::new();
    let guard = format!("{}_H", sanitize(module.name()).to_uppercase());

    let _ = writeln!(out, "// Generated header for module `{}`", module.name());
    let _ = writeln!(out, "#ifndef {guard}");
    let _ = writeln!(out, "#define {guard}");
    let _ = writeln!(out);
    let _ = writeln!(out, "#include <stdbool.h>");
    let _ = writeln!(out, "#include <stdint.h>");
    let _ = writeln!(out);
    let _ = writeln!(out, "#ifdef __cplusplus");
    let _ = writeln!(out, "extern \"C\" {{");
    let _ = writeln!(out, "#endif");

    let types = module.metadata().module_tag_values(DECLARE_IN_HEADER_TAG);
    if !types.is_empty() {
        let _ = writeln!(out);
        for ty in &types {
            let _ = writeln!(out, "typedef struct {ty} {ty};");
        }
    }

    let functions = module.metadata().functions_with_tag(DECLARE_IN_HEADER_TAG);
    if !functions.is_empty() {
        let _ = writeln!(out);
        for entry in &functions {
            if let Some(decl) = module.function_declaration(&entry.function) {
                let _ = writeln!(out, "{decl};");
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "#ifdef __cplusplus");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out, "#endif");
    let _ = writeln!(out);
    let _ = writeln!(out, "#endif // {guard}");
    out
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::ReferenceModule;
    use crate::types::{ElementType, FunctionDeclaration, NamedVariableType, VariableType};

    #[test]
    fn header_lists_tagged_functions_and_types() {
        let mut module = ReferenceModule::new("demo");
        let decl = FunctionDeclaration::new(
            "demo_Predict",
            vec![
                NamedVariableType::new("input0", VariableType::Pointer(ElementType::Double)),
                NamedVariableType::new("output0", VariableType::Pointer(ElementType::Float)),
            ],
        );
        module.begin_function(decl).unwrap().finish().unwrap();
        let hidden = FunctionDeclaration::new("demo_helper", vec![]);
        module.begin_function(hidden).unwrap().finish().unwrap();

        let md = module.metadata_mut();
        md.insert_function_tag("demo_Predict", DECLARE_IN_HEADER_TAG, "");
        md.insert_module_tag(DECLARE_IN_HEADER_TAG, "DemoState");

        let header = write_header(&module);
        assert!(header.contains("#ifndef DEMO_H"));
        assert!(header.contains("typedef struct DemoState DemoState;"));
        assert!(header.contains("void demo_Predict(double* input0, float* output0);"));
        assert!(!header.contains("demo_helper"));
    }
}
