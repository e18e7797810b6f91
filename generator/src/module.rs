// module.rs - Module generator: declarations to header and module text
//
// Collects includes, structures, variables, functions and the interface
// functions exposed across the foreign-call boundary, then renders them as a
// C++ header and a C++ module. After the module is built and loaded, `bind`
// attaches call layouts to every interface symbol.
//
// Preconditions: every `TypeId` handed in belongs to this module's session.
// Postconditions: struct definitions are emitted before anything using them.
// Failure modes: naming errors from the structure generator; missing
//                interface symbols produce `UnresolvedSymbol`.
// Side effects: `write_sources` and `build` write into the target directory.

use std::collections::{BTreeMap, HashSet};
use std::ffi::c_void;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::descriptor::TypeId;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::library::CallableUnit;
use crate::structure::StructureGenerator;
use crate::toolchain::{BuildRequest, BuildService, ExportOptions};
use crate::typemap::{Origin, ScalarTypeMap};

// ── Declarations ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub ty: TypeId,
    pub initializer: Option<String>,
    pub is_constant: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Variable {
            name: name.into(),
            ty,
            initializer: None,
            is_constant: false,
        }
    }

    pub fn initialized(mut self, initializer: impl Into<String>) -> Self {
        self.initializer = Some(initializer.into());
        self
    }

    pub fn constant(mut self) -> Self {
        self.is_constant = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    /// `None` renders as `void`.
    pub return_type: Option<TypeId>,
    pub arguments: Vec<Variable>,
    /// Dedented body lines, stored verbatim.
    pub body: Vec<String>,
}

impl Function {
    pub fn new(
        name: impl Into<String>,
        return_type: Option<TypeId>,
        arguments: Vec<Variable>,
        body: &str,
    ) -> Self {
        Function {
            name: name.into(),
            return_type,
            arguments,
            body: split_and_dedent_lines(body),
        }
    }

    /// `c_<name>`, forwarding to this function.
    pub fn default_interface(&self) -> Function {
        self.interface_named(format!("c_{}", self.name))
    }

    /// A function with this signature under another name whose body is a
    /// single call to this one.
    pub fn interface_named(&self, name: impl Into<String>) -> Function {
        let args: Vec<&str> = self.arguments.iter().map(|a| a.name.as_str()).collect();
        let call = format!("{}({})", self.name, args.join(", "));
        let body = match self.return_type {
            Some(_) => format!("return {call};"),
            None => format!("{call};"),
        };
        Function {
            name: name.into(),
            return_type: self.return_type,
            arguments: self.arguments.clone(),
            body: vec![body],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    /// Included by the module only, not by its header.
    pub module_only: bool,
}

/// An interface symbol together with the layouts of its call signature.
///
/// The address is only valid while the unit it came from stays loaded.
#[derive(Debug, Clone)]
pub struct BoundFunction {
    pub name: String,
    pub address: *const c_void,
    pub return_layout: Option<Layout>,
    pub argument_layouts: Vec<Layout>,
}

impl BoundFunction {
    /// Reinterpret the symbol as a function pointer type.
    ///
    /// # Safety
    /// `F` must be a function pointer type matching the interface's
    /// signature, and the unit must still be loaded.
    pub unsafe fn cast<F: Copy>(&self) -> F {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const c_void>());
        std::mem::transmute_copy(&self.address)
    }
}

// ── Module generator ────────────────────────────────────────────────────────

pub struct ModuleGenerator {
    header_name: Option<String>,
    headers: Vec<Header>,
    structures: Vec<TypeId>,
    variables: Vec<Variable>,
    functions: Vec<Function>,
    interfaces: Vec<Function>,
    structure_generator: StructureGenerator,
}

impl ModuleGenerator {
    pub fn new(type_map: Rc<ScalarTypeMap>) -> Self {
        ModuleGenerator {
            header_name: None,
            headers: Vec::new(),
            structures: Vec::new(),
            variables: Vec::new(),
            functions: Vec::new(),
            interfaces: Vec::new(),
            structure_generator: StructureGenerator::new(type_map),
        }
    }

    /// A module whose structures live in its own header, `header_name`.
    pub fn with_header(type_map: Rc<ScalarTypeMap>, header_name: &str) -> Self {
        let mut generator = ModuleGenerator::new(type_map);
        generator.header_name = Some(header_name.to_string());
        generator
    }

    pub fn header_name(&self) -> Option<&str> {
        self.header_name.as_deref()
    }

    pub fn structure_generator(&mut self) -> &mut StructureGenerator {
        &mut self.structure_generator
    }

    /// Re-adding a header replaces its `module_only` flag in place.
    pub fn add_header(&mut self, name: &str, module_only: bool) {
        match self.headers.iter_mut().find(|h| h.name == name) {
            Some(header) => header.module_only = module_only,
            None => self.headers.push(Header {
                name: name.to_string(),
                module_only,
            }),
        }
    }

    pub fn add_structure(&mut self, id: TypeId, name: Option<&str>) {
        self.structures.push(id);
        if let Some(name) = name {
            self.structure_generator.rename(id, name);
        }
    }

    pub fn add_variable(&mut self, variable: Variable) {
        self.variables.push(variable);
    }

    pub fn add_function(
        &mut self,
        name: &str,
        return_type: Option<TypeId>,
        arguments: Vec<Variable>,
        body: &str,
    ) -> FunctionId {
        self.functions.push(Function::new(name, return_type, arguments, body));
        FunctionId(self.functions.len() - 1)
    }

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.0]
    }

    pub fn add_interface(&mut self, interface: Function) -> InterfaceId {
        self.interfaces.push(interface);
        InterfaceId(self.interfaces.len() - 1)
    }

    /// Expose a function through its default interface.
    pub fn expose(&mut self, id: FunctionId) -> InterfaceId {
        let interface = self.functions[id.0].default_interface();
        self.add_interface(interface)
    }

    pub fn interface(&self, id: InterfaceId) -> &Function {
        &self.interfaces[id.0]
    }

    pub fn interfaces(&self) -> &[Function] {
        &self.interfaces
    }

    // ── Rendering ──

    pub fn render_module(&mut self) -> Result<String> {
        let mut out = String::new();

        let mut includes: Vec<&str> = self.headers.iter().map(|h| h.name.as_str()).collect();
        if let Some(own) = self.header_name.as_deref() {
            if !includes.contains(&own) {
                includes.insert(0, own);
            }
        }
        let includes: Vec<String> = includes.into_iter().map(include_line).collect();
        for line in &includes {
            let _ = writeln!(out, "{line}");
        }
        if !includes.is_empty() {
            out.push('\n');
        }

        if self.header_name.is_none() {
            for structure in self.render_structures()? {
                let _ = writeln!(out, "{structure}\n");
            }
        }

        let variables = self.variables.clone();
        for variable in &variables {
            let _ = writeln!(out, "{}", self.render_variable(variable)?);
        }
        if !variables.is_empty() {
            out.push('\n');
        }

        let functions = self.functions.clone();
        for function in &functions {
            let _ = writeln!(out, "{}\n", self.render_definition(function)?);
        }

        out.push_str("extern \"C\" {\n");
        let interfaces = self.interfaces.clone();
        for (i, interface) in interfaces.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "{}", self.render_definition(interface)?);
        }
        out.push_str("}\n");
        Ok(out)
    }

    pub fn render_header(&mut self) -> Result<String> {
        let mut out = String::new();

        let includes: Vec<String> = self
            .headers
            .iter()
            .filter(|h| !h.module_only)
            .map(|h| include_line(&h.name))
            .collect();
        for line in &includes {
            let _ = writeln!(out, "{line}");
        }
        if !includes.is_empty() {
            out.push('\n');
        }

        for structure in self.render_structures()? {
            let _ = writeln!(out, "{structure}\n");
        }

        out.push_str("extern \"C\" {\n");
        let interfaces = self.interfaces.clone();
        for interface in &interfaces {
            let _ = writeln!(out, "{};", self.render_signature(interface)?);
        }
        out.push_str("}\n");
        Ok(out)
    }

    /// Struct definitions of every registered structure, unioned in
    /// first-seen order.
    pub fn render_structures(&mut self) -> Result<Vec<String>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in self.structures.clone() {
            for structure in self.structure_generator.render_structures(id)? {
                if seen.insert(structure.clone()) {
                    out.push(structure);
                }
            }
        }
        Ok(out)
    }

    fn type_name(&mut self, ty: Option<TypeId>) -> Result<String> {
        match ty {
            Some(id) => self.structure_generator.canonical_name(id),
            None => Ok("void".to_string()),
        }
    }

    pub fn render_variable(&mut self, variable: &Variable) -> Result<String> {
        let ty = self.type_name(Some(variable.ty))?;
        let constant = if variable.is_constant { " const" } else { "" };
        let init = match &variable.initializer {
            Some(init) => format!(" = {init}"),
            None => String::new(),
        };
        Ok(format!("{ty}{constant} {}{init};", variable.name))
    }

    pub fn render_signature(&mut self, function: &Function) -> Result<String> {
        let ret = self.type_name(function.return_type)?;
        let mut args = Vec::with_capacity(function.arguments.len());
        for arg in &function.arguments {
            args.push(format!("{} {}", self.type_name(Some(arg.ty))?, arg.name));
        }
        Ok(format!("{ret} {}({})", function.name, args.join(", ")))
    }

    pub fn render_definition(&mut self, function: &Function) -> Result<String> {
        let mut out = self.render_signature(function)?;
        out.push_str(" {\n");
        for line in &function.body {
            if line.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, "    {line}");
            }
        }
        out.push('}');
        Ok(out)
    }

    // ── Building and binding ──

    /// Symbols the built unit must export.
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions::new(self.interfaces.iter().map(|f| f.name.clone())).with_init_symbol()
    }

    /// Write the module (and its own header, when it has one) into `dir`.
    /// Returns the source files to compile.
    pub fn write_sources(&mut self, dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        if let Some(header) = self.header_name.clone() {
            let path = dir.join(header.trim_matches(&['"', '<', '>'][..]));
            let text = self.render_header()?;
            std::fs::write(&path, text).map_err(|e| Error::io(&path, e))?;
        }

        let source = dir.join(format!("{stem}.cpp"));
        let text = self.render_module()?;
        std::fs::write(&source, text).map_err(|e| Error::io(&source, e))?;
        Ok(vec![source])
    }

    /// Render, write and build the module; returns the loadable unit.
    pub fn build(
        &mut self,
        service: &dyn BuildService,
        module_name: &str,
        target_dir: &Path,
    ) -> Result<PathBuf> {
        let stem = module_name.rsplit('.').next().unwrap_or(module_name);
        let sources = self.write_sources(target_dir, stem)?;
        service.build(&BuildRequest {
            module_name: module_name.to_string(),
            target_dir: target_dir.to_path_buf(),
            sources,
            export: self.export_options(),
        })
    }

    /// Look up every interface in `unit` and attach its call layouts.
    pub fn bind(&mut self, unit: &dyn CallableUnit) -> Result<BTreeMap<String, BoundFunction>> {
        let mut out = BTreeMap::new();
        for interface in self.interfaces.clone() {
            let address = unit.lookup(&interface.name).ok_or_else(|| Error::UnresolvedSymbol {
                symbol: interface.name.clone(),
                unit: unit.path().to_path_buf(),
            })?;

            let return_layout = match interface.return_type {
                Some(ty) => Some(self.call_layout(ty)?),
                None => None,
            };
            let mut argument_layouts = Vec::with_capacity(interface.arguments.len());
            for arg in &interface.arguments {
                argument_layouts.push(self.call_layout(arg.ty)?);
            }

            log::debug!("bound '{}' from {}", interface.name, unit.path().display());
            out.insert(
                interface.name.clone(),
                BoundFunction {
                    name: interface.name,
                    address,
                    return_layout,
                    argument_layouts,
                },
            );
        }
        Ok(out)
    }

    /// Layout of the foreign-call form of `ty`, or of `ty` itself when it has
    /// none (C spellings of named structures).
    fn call_layout(&mut self, ty: TypeId) -> Result<Layout> {
        let sg = &mut self.structure_generator;
        let form = sg.counterpart(ty, Origin::Foreign)?.unwrap_or(ty);
        sg.layout(form)
    }
}

fn include_line(name: &str) -> String {
    if name.starts_with('<') || name.starts_with('"') {
        format!("#include {name}")
    } else {
        format!("#include \"{name}\"")
    }
}

/// Split `text` into lines with trailing whitespace, surrounding blank lines
/// and the leading whitespace shared by all non-blank lines removed. Only an
/// identical prefix is stripped, so mixed tabs and spaces stay as written.
pub fn split_and_dedent_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .skip_while(|line| line.is_empty())
        .collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    let mut indent: Option<&str> = None;
    for &line in lines.iter().filter(|line| !line.is_empty()) {
        let leading = &line[..line.len() - line.trim_start().len()];
        indent = Some(match indent {
            Some(shared) => common_prefix(shared, leading),
            None => leading,
        });
    }
    let indent = indent.unwrap_or("");

    lines
        .into_iter()
        .map(|line| line.strip_prefix(indent).unwrap_or(line).to_string())
        .collect()
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map_or(a.len().min(b.len()), |((at, _), _)| at);
    &a[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::NativeSizeOracle;

    fn module() -> ModuleGenerator {
        ModuleGenerator::new(Rc::new(ScalarTypeMap::new(&NativeSizeOracle).expect("type map")))
    }

    #[test]
    fn dedent_strips_common_indentation() {
        let lines = split_and_dedent_lines("\n\n        int x = 1;\n          return x;   \n\n");
        assert_eq!(lines, vec!["int x = 1;", "  return x;"]);
    }

    #[test]
    fn dedent_keeps_lines_with_other_whitespace() {
        let lines = split_and_dedent_lines("  a = 1;\n\u{3000}b = 2;");
        assert_eq!(lines, vec!["  a = 1;", "\u{3000}b = 2;"]);

        let lines = split_and_dedent_lines("\u{3000}\u{3000}a;\n\u{3000}b;");
        assert_eq!(lines, vec!["\u{3000}a;", "b;"]);
    }

    #[test]
    fn dedent_strips_only_the_shared_prefix_of_mixed_indentation() {
        let lines = split_and_dedent_lines("\t  if (x) {\n\t    y();\n  \t}");
        assert_eq!(lines, vec!["\t  if (x) {", "\t    y();", "  \t}"]);

        let lines = split_and_dedent_lines("\t\tx;\n\t  y;");
        assert_eq!(lines, vec!["\tx;", "  y;"]);
    }

    #[test]
    fn dedent_keeps_inner_blank_lines() {
        let lines = split_and_dedent_lines("    a;\n\n    b;");
        assert_eq!(lines, vec!["a;", "", "b;"]);
        assert!(split_and_dedent_lines("   \n  ").is_empty());
    }

    #[test]
    fn void_function_without_arguments() {
        let mut m = module();
        let id = m.add_function("ping", None, Vec::new(), "counter += 1;");
        let f = m.function(id).clone();
        assert_eq!(m.render_definition(&f).unwrap(), "void ping() {\n    counter += 1;\n}");
        let exposed = m.expose(id);
        let iface = m.interface(exposed).clone();
        assert_eq!(m.render_definition(&iface).unwrap(), "void c_ping() {\n    ping();\n}");
    }

    #[test]
    fn default_interface_returns_the_call() {
        let mut m = module();
        let int = m.structure_generator().target("int");
        let id = m.add_function(
            "add",
            Some(int),
            vec![Variable::new("a", int), Variable::new("b", int)],
            "return a + b;",
        );
        let iface = m.function(id).default_interface();
        assert_eq!(iface.name, "c_add");
        assert_eq!(
            m.render_definition(&iface).unwrap(),
            "int c_add(int a, int b) {\n    return add(a, b);\n}"
        );
    }

    #[test]
    fn variable_declarations() {
        let mut m = module();
        let double = m.structure_generator().tensor_scalar("float64").unwrap();
        let plain = Variable::new("scale", double);
        let init = Variable::new("limit", double).initialized("1.5").constant();
        assert_eq!(m.render_variable(&plain).unwrap(), "double scale;");
        assert_eq!(m.render_variable(&init).unwrap(), "double const limit = 1.5;");
    }

    #[test]
    fn includes_are_quoted_unless_bracketed() {
        assert_eq!(include_line("<stdlib.h>"), "#include <stdlib.h>");
        assert_eq!(include_line("demo.hpp"), "#include \"demo.hpp\"");
        assert_eq!(include_line("\"demo.hpp\""), "#include \"demo.hpp\"");
    }

    #[test]
    fn structures_are_unioned_in_first_seen_order() {
        let mut m = module();
        let sg = m.structure_generator();
        let i = sg.tensor_scalar("int32").unwrap();
        let inner = sg.tensor_struct([("a", i)]).unwrap();
        let left = sg.tensor_struct([("inner", inner), ("l", i)]).unwrap();
        let right = sg.tensor_struct([("inner", inner), ("r", i)]).unwrap();
        m.add_structure(left, Some("Left"));
        m.add_structure(right, Some("Right"));
        m.add_structure(inner, Some("Inner"));
        let rendered = m.render_structures().unwrap();
        let names: Vec<&str> = rendered
            .iter()
            .map(|s| s.lines().next().unwrap_or(""))
            .collect();
        assert_eq!(names, vec!["struct Inner {", "struct Left {", "struct Right {"]);
    }

    #[test]
    fn own_header_moves_structures_out_of_the_module() {
        let map = Rc::new(ScalarTypeMap::new(&NativeSizeOracle).unwrap());
        let mut m = ModuleGenerator::with_header(map, "point.hpp");
        m.add_header("<stdlib.h>", true);
        let int = m.structure_generator().target("int");
        let point = m.structure_generator().record("Point", [("x", int), ("y", int)]).unwrap();
        m.add_structure(point, Some("Point"));

        let module = m.render_module().unwrap();
        assert!(module.starts_with("#include \"point.hpp\"\n#include <stdlib.h>\n"));
        assert!(!module.contains("struct Point"));

        let header = m.render_header().unwrap();
        assert!(!header.contains("stdlib"));
        assert!(header.starts_with("struct Point {\n    int x;\n    int y;\n};\n"));
    }

    #[test]
    fn export_options_always_carry_init_symbol() {
        let mut m = module();
        let options = m.export_options();
        assert!(options.symbols.is_empty());
        assert!(options.always_export_init_symbol);

        let id = m.add_function("f", None, Vec::new(), "");
        m.expose(id);
        assert_eq!(m.export_options().symbols, vec!["c_f".to_string()]);
    }

    struct NoSymbols;

    impl CallableUnit for NoSymbols {
        fn lookup(&self, _name: &str) -> Option<*const c_void> {
            None
        }

        fn path(&self) -> &Path {
            Path::new("libnothing.so")
        }
    }

    #[test]
    fn missing_interface_symbol_is_unresolved() {
        let mut m = module();
        let id = m.add_function("f", None, Vec::new(), "");
        m.expose(id);
        let err = m.bind(&NoSymbols).unwrap_err();
        assert!(matches!(err, Error::UnresolvedSymbol { ref symbol, .. } if symbol == "c_f"));
    }
}
