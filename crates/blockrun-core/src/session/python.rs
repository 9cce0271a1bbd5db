use uuid::Uuid;

use super::{ReplDialect, string_literal};
use crate::stream::StreamSource;

/// Variable holding matplotlib's backend from before any block changed it.
const PLT_DEFAULT_BACKEND_VAR: &str = "BLOCKRUN_MATPLOTLIB_DEFAULT_BACKEND";

/// Prompts Python's interactive console writes to stderr.
const PROMPTS: [&str; 2] = [">>> ", "... "];

/// Python session on top of `python -i`.
///
/// Blocks run against a private globals dict and print through a private
/// alias of `print`, so user code that shadows either cannot break the
/// sigil protocol.
#[derive(Debug, Clone)]
pub struct PythonRepl {
    embed_plots: bool,
    print_name: String,
    globals_name: String,
}

impl PythonRepl {
    pub fn new(embed_plots: bool) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            embed_plots,
            print_name: format!("__print_{}", id),
            globals_name: format!("__globals_{}", id),
        }
    }

    fn backend_prelude(&self) -> String {
        // `agg` keeps plt.show() from blocking the runtime on a GUI window.
        let backend = if self.embed_plots {
            "'agg'"
        } else {
            PLT_DEFAULT_BACKEND_VAR
        };
        format!("try:\n    matplotlib.use({})\nexcept:\n    pass\n\n", backend)
    }
}

impl ReplDialect for PythonRepl {
    fn launch_args(&self, configured: Vec<String>) -> Vec<String> {
        let mut args = vec!["-i".to_string(), "-q".to_string(), "-u".to_string()];
        args.extend(configured);
        args
    }

    fn setup_input(&self) -> Option<String> {
        Some(format!(
            "import sys\n\
             {print} = print\n\
             {globals} = {{**globals()}}\n\
             try:\n    import matplotlib\n    {backend} = matplotlib.get_backend()\nexcept:\n    pass\n\n",
            print = self.print_name,
            globals = self.globals_name,
            backend = PLT_DEFAULT_BACKEND_VAR,
        ))
    }

    fn wrap_code(&self, code: &str, sigil: &str) -> String {
        let source = string_literal(&format!("{}\n", code.replace("\r\n", "\n")));
        format!(
            "\n{prelude}\
             try:\n\
             \x20   try:\n\
             \x20       {print}(eval(compile({source}, \"<code block>\", \"eval\"), {globals}))\n\
             \x20   except SyntaxError:\n\
             \x20       exec(compile({source}, \"<code block>\", \"exec\"), {globals})\n\
             except Exception as e:\n\
             \x20   {print}(e, file=sys.stderr)\n\
             finally:\n\
             \x20   {print}({sigil}, end=\"\", file=sys.stderr)\n\
             \x20   {print}({sigil}, end=\"\")\n\n",
            prelude = self.backend_prelude(),
            print = self.print_name,
            globals = self.globals_name,
            source = source,
            sigil = string_literal(sigil),
        )
    }

    fn fences_stderr(&self) -> bool {
        true
    }

    fn remove_prompts(&self, output: &str, source: StreamSource) -> String {
        if source != StreamSource::Stderr {
            return output.to_string();
        }
        let mut text = output;
        while let Some(rest) = PROMPTS.iter().find_map(|p| text.strip_prefix(p)) {
            text = rest;
        }
        while let Some(rest) = PROMPTS.iter().find_map(|p| text.strip_suffix(p)) {
            text = rest;
        }
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_prompts_from_stderr() {
        let repl = PythonRepl::new(false);
        assert_eq!(repl.remove_prompts(">>> ... ", StreamSource::Stderr), "");
        assert_eq!(
            repl.remove_prompts(">>> Traceback\n>>> ", StreamSource::Stderr),
            "Traceback\n"
        );
        assert_eq!(repl.remove_prompts(">>> 1", StreamSource::Stdout), ">>> 1");
    }

    #[test]
    fn test_wrap_code_has_no_blank_line_inside_try() {
        let repl = PythonRepl::new(true);
        let wrapped = repl.wrap_code("x = 1\r\n\r\nprint(x)", "SIGIL_PY");

        let body = &wrapped[wrapped.find("try:\n    try:").unwrap()..];
        let body = body.trim_end_matches('\n');
        assert!(!body.contains("\n\n"));
        assert!(wrapped.contains(r#""x = 1\n\nprint(x)\n""#));
        assert!(wrapped.contains("matplotlib.use('agg')"));
        assert!(wrapped.contains("(\"SIGIL_PY\", end=\"\", file=sys.stderr)\n"));
        assert!(wrapped.ends_with("(\"SIGIL_PY\", end=\"\")\n\n"));
    }

    #[test]
    fn test_wrap_code_restores_default_backend_without_embedding() {
        let wrapped = PythonRepl::new(false).wrap_code("1 + 1", "S");
        assert!(wrapped.contains(&format!("matplotlib.use({})", PLT_DEFAULT_BACKEND_VAR)));
    }

    #[test]
    fn test_setup_defines_aliases() {
        let repl = PythonRepl::new(false);
        let setup = repl.setup_input().unwrap();
        assert!(setup.contains(&format!("{} = print", repl.print_name)));
        assert!(setup.contains(&format!("{} = {{**globals()}}", repl.globals_name)));
    }
}
