//! Named engine operations.
//!
//! Thin wrappers over `call`. The engine owns the method table; these only
//! fix the method names and argument shapes it expects.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::correlator::{PendingCall, TypedCall};

/// Source language accepted by the engine's compilers and linters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Plcasm,
    Stl,
    Ladder,
    Plcscript,
    St,
    Project,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Plcasm,
        Language::Stl,
        Language::Ladder,
        Language::Plcscript,
        Language::St,
        Language::Project,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Plcasm => "plcasm",
            Language::Stl => "stl",
            Language::Ladder => "ladder",
            Language::Plcscript => "plcscript",
            Language::St => "st",
            Language::Project => "project",
        }
    }

    /// Engine method that compiles this language directly.
    pub fn compile_method(&self) -> &'static str {
        match self {
            Language::Plcasm => "compilePLCASM",
            Language::Stl => "compileSTL",
            Language::Ladder => "compileLadder",
            Language::Plcscript => "compilePLCScript",
            Language::St => "compileST",
            Language::Project => "compileProject",
        }
    }

    /// Engine method that lints this language.
    pub fn lint_method(&self) -> &'static str {
        match self {
            Language::Plcasm => "lintPLCASM",
            Language::Stl => "lintSTL",
            Language::Ladder => "lintLadder",
            Language::Plcscript => "lintPLCScript",
            Language::St => "lintST",
            Language::Project => "lintProject",
        }
    }

    fn options(&self) -> Value {
        json!({ "language": self.as_str() })
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|language| language.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown language: {}", s))
    }
}

/// Operations every engine target supports: the default instance through
/// [`PlcWorker`](crate::client::PlcWorker), or a created
/// [`Instance`](crate::client::Instance).
pub trait EngineOps {
    /// Post a `call` request for `method` on this target.
    fn invoke(&self, method: &str, args: Vec<Value>) -> PendingCall;

    /// Compile `source`, letting the engine dispatch on `language`.
    fn compile(&self, source: &str, language: Language) -> PendingCall {
        self.invoke("compile", vec![json!(source), language.options()])
    }

    fn compile_plcasm(&self, source: &str) -> PendingCall {
        self.invoke(Language::Plcasm.compile_method(), vec![json!(source)])
    }

    /// Compile PLCASM, load the program, and run it once in debug mode.
    fn compile_plcasm_and_run(&self, source: &str) -> PendingCall {
        self.invoke(
            Language::Plcasm.compile_method(),
            vec![json!(source), json!({ "run": true })],
        )
    }

    fn compile_stl(&self, source: &str) -> PendingCall {
        self.invoke(Language::Stl.compile_method(), vec![json!(source)])
    }

    fn compile_ladder(&self, source: &str) -> PendingCall {
        self.invoke(Language::Ladder.compile_method(), vec![json!(source)])
    }

    fn compile_plcscript(&self, source: &str) -> PendingCall {
        self.invoke(Language::Plcscript.compile_method(), vec![json!(source)])
    }

    fn compile_st(&self, source: &str) -> PendingCall {
        self.invoke(Language::St.compile_method(), vec![json!(source)])
    }

    fn compile_project(&self, source: &str) -> PendingCall {
        self.invoke(Language::Project.compile_method(), vec![json!(source)])
    }

    /// Compile down to bytecode and load it in one step.
    fn compile_all(&self, source: &str, language: Language) -> PendingCall {
        self.invoke("compileAll", vec![json!(source), json!(language.as_str())])
    }

    /// Lint `source` with the linter for `language`.
    fn lint(&self, source: &str, language: Language) -> PendingCall {
        self.invoke(language.lint_method(), vec![json!(source)])
    }

    fn lint_plcasm(&self, source: &str) -> PendingCall {
        self.lint(source, Language::Plcasm)
    }

    fn lint_stl(&self, source: &str) -> PendingCall {
        self.lint(source, Language::Stl)
    }

    fn lint_ladder(&self, source: &str) -> PendingCall {
        self.lint(source, Language::Ladder)
    }

    fn lint_plcscript(&self, source: &str) -> PendingCall {
        self.lint(source, Language::Plcscript)
    }

    fn lint_st(&self, source: &str) -> PendingCall {
        self.lint(source, Language::St)
    }

    fn lint_project(&self, source: &str) -> PendingCall {
        self.lint(source, Language::Project)
    }

    fn download_assembly(&self, assembly: &str) -> PendingCall {
        self.invoke("downloadAssembly", vec![json!(assembly)])
    }

    /// Load bytecode given as a hex string.
    fn download_bytecode(&self, bytecode: &str) -> PendingCall {
        self.invoke("downloadBytecode", vec![json!(bytecode)])
    }

    /// Run one program cycle.
    fn run(&self) -> PendingCall {
        self.invoke("run", Vec::new())
    }

    /// Run one cycle without resetting the stack between cycles.
    fn run_dirty(&self) -> PendingCall {
        self.invoke("runDirty", Vec::new())
    }

    fn set_millis(&self, millis: u32) -> PendingCall {
        self.invoke("setMillis", vec![json!(millis)])
    }

    fn read_memory_area(&self, address: u32, size: u32) -> TypedCall<Vec<u8>> {
        self.invoke("readMemoryArea", vec![json!(address), json!(size)]).typed()
    }

    fn write_memory_area(&self, address: u32, bytes: &[u8]) -> PendingCall {
        self.invoke("writeMemoryArea", vec![json!(address), json!(bytes)])
    }

    fn write_memory_byte(&self, address: u32, byte: u8) -> PendingCall {
        self.invoke("writeMemoryByte", vec![json!(address), json!(byte)])
    }

    fn print_info(&self) -> PendingCall {
        self.invoke("printInfo", Vec::new())
    }

    fn reset_stats(&self) -> PendingCall {
        self.invoke("resetStats", Vec::new())
    }

    fn start_runtime(&self) -> PendingCall {
        self.invoke("startRuntime", Vec::new())
    }

    fn stop_runtime(&self) -> PendingCall {
        self.invoke("stopRuntime", Vec::new())
    }

    /// Names of the functions the engine module exports.
    fn get_exports(&self) -> TypedCall<Vec<String>> {
        self.invoke("getExports", Vec::new()).typed()
    }

    /// Call a raw module export by name.
    fn call_export(&self, name: &str, args: Vec<Value>) -> PendingCall {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(json!(name));
        full.extend(args);
        self.invoke("callExport", full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientError;
    use std::sync::Mutex;

    /// Records invocations instead of sending them.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl EngineOps for Recorder {
        fn invoke(&self, method: &str, args: Vec<Value>) -> PendingCall {
            self.calls.lock().unwrap().push((method.to_string(), args));
            PendingCall::failed(ClientError::Terminated)
        }
    }

    impl Recorder {
        fn last(&self) -> (String, Vec<Value>) {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[test]
    fn test_language_round_trip() {
        for language in Language::ALL {
            assert_eq!(language.as_str().parse::<Language>(), Ok(language));
            assert_eq!(serde_json::to_value(language).unwrap(), json!(language.as_str()));
        }
        assert_eq!("PLCScript".parse::<Language>(), Ok(Language::Plcscript));
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_compile_passes_language_option() {
        let ops = Recorder::default();

        let _ = ops.compile("{}", Language::Ladder);
        assert_eq!(
            ops.last(),
            ("compile".into(), vec![json!("{}"), json!({"language": "ladder"})])
        );

        let _ = ops.compile_plcasm("nop");
        assert_eq!(ops.last(), ("compilePLCASM".into(), vec![json!("nop")]));

        let _ = ops.compile_plcasm_and_run("nop");
        assert_eq!(
            ops.last(),
            ("compilePLCASM".into(), vec![json!("nop"), json!({"run": true})])
        );
    }

    #[test]
    fn test_compile_all_passes_bare_language() {
        let ops = Recorder::default();

        let _ = ops.compile_all("x := 1;", Language::St);
        assert_eq!(ops.last(), ("compileAll".into(), vec![json!("x := 1;"), json!("st")]));

        let _ = ops.compile_all("A I0.0\n= Q0.0", Language::Stl);
        assert_eq!(ops.last().1[1], json!("stl"));
    }

    #[test]
    fn test_lint_maps_to_specific_method() {
        let ops = Recorder::default();

        let _ = ops.lint("A I0.0", Language::Stl);
        assert_eq!(ops.last().0, "lintSTL");
        let _ = ops.lint_plcscript("let x = 1");
        assert_eq!(ops.last().0, "lintPLCScript");
        let _ = ops.lint_project("PROJECT x");
        assert_eq!(ops.last().0, "lintProject");
    }

    #[test]
    fn test_memory_operations() {
        let ops = Recorder::default();

        let _ = ops.read_memory_area(64, 4);
        assert_eq!(ops.last(), ("readMemoryArea".into(), vec![json!(64), json!(4)]));

        let _ = ops.write_memory_area(10, &[1, 2, 255]);
        assert_eq!(ops.last(), ("writeMemoryArea".into(), vec![json!(10), json!([1, 2, 255])]));

        let _ = ops.write_memory_byte(3, 7);
        assert_eq!(ops.last(), ("writeMemoryByte".into(), vec![json!(3), json!(7)]));
    }

    #[test]
    fn test_call_export_prepends_name() {
        let ops = Recorder::default();

        let _ = ops.call_export("compileAssembly", vec![json!(true)]);
        assert_eq!(
            ops.last(),
            ("callExport".into(), vec![json!("compileAssembly"), json!(true)])
        );

        let _ = ops.get_exports();
        assert_eq!(ops.last(), ("getExports".into(), vec![]));
    }
}
