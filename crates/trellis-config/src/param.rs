//! Parameter value types.
//!
//! Parameters, export expressions and most step fields are template strings
//! rendered by minijinja against the run's variables. Rendering happens in the
//! executor; here they are plain strings.
//!
//! ```yaml
//! params:
//!   target: "example.com"
//!   wordlist: "{{ data_dir }}/words.txt"
//! ```

/// A parameter value is a template string that gets resolved at runtime.
pub type ParamValue = String;
