/// Package pattern passed to the runner when no packages are selected.
pub const DEFAULT_PACKAGES: &str = "./...";

/// Default runner executable.
pub const DEFAULT_GO: &str = "go";

/// Resolved runner invocation (clap-free).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl RunConfig {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build `go test -json <flags...> <packages...>`.
    ///
    /// `packages` are forwarded unmodified; an empty selection runs everything.
    pub fn go_test(go: &str, packages: &[String], flags: &[String]) -> Self {
        let mut args = vec!["test".to_string(), "-json".to_string()];
        args.extend(flags.iter().cloned());
        if packages.is_empty() {
            args.push(DEFAULT_PACKAGES.to_string());
        } else {
            args.extend(packages.iter().cloned());
        }
        Self::new(go, args)
    }

    /// The invocation as a single display string.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::go_test(DEFAULT_GO, &[], &[])
    }
}
