use getopts::{Fail, Matches, Options};
use std::{
    error::Error,
    fmt::{Debug, Display},
};

pub const STACK_LIMIT_FLAG: &str = "stack-limit";
pub const HELP_FLAG: &str = "help";

/// Environment variable read when `--stack-limit` is not given.
pub const STACK_LIMIT_ENV: &str = "FUZZCOV_STACK_LIMIT";

#[derive(Clone)]
pub struct DefaultArguments {
    pub stack_limit: usize,
}
impl Default for DefaultArguments {
    fn default() -> Self {
        Self { stack_limit: 128 * 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arguments {
    /// Maximum number of bytes of stack the code under test may use
    /// before the process is aborted.
    pub stack_limit: usize,
}

impl Default for Arguments {
    fn default() -> Self {
        let defaults = DefaultArguments::default();
        Self {
            stack_limit: defaults.stack_limit,
        }
    }
}

#[must_use]
pub fn options_parser() -> Options {
    let mut options = Options::new();

    let defaults = DefaultArguments::default();

    options.optopt(
        "",
        STACK_LIMIT_FLAG,
        format!(
            "maximum stack usage of the code under test, in bytes (default: {default}, \
             or the value of {env})",
            default = defaults.stack_limit,
            env = STACK_LIMIT_ENV,
        )
        .as_str(),
        "N",
    );
    options.optflag("h", HELP_FLAG, "print this help menu");

    options
}

impl Arguments {
    /// Parses `args` (without the program name) with the given parser.
    pub fn from_parser(parser: &Options, args: &[String]) -> Result<Self, ArgumentsError> {
        let matches = parser.parse(args)?;
        Self::from_matches(&matches)
    }

    /// Builds the arguments from parsed command-line options, falling back
    /// to [`STACK_LIMIT_ENV`] and then to the defaults.
    pub fn from_matches(matches: &Matches) -> Result<Self, ArgumentsError> {
        if matches.opt_present(HELP_FLAG) {
            return Err(ArgumentsError::WantsHelp);
        }
        Self::resolve(matches.opt_str(STACK_LIMIT_FLAG), std::env::var(STACK_LIMIT_ENV).ok())
    }

    /// Builds the arguments from [`STACK_LIMIT_ENV`] alone.
    pub fn from_env() -> Result<Self, ArgumentsError> {
        Self::resolve(None, std::env::var(STACK_LIMIT_ENV).ok())
    }

    fn resolve(flag: Option<String>, env: Option<String>) -> Result<Self, ArgumentsError> {
        let stack_limit = match (flag, env) {
            (Some(flag), _) => parse_stack_limit(&flag, &format!("--{}", STACK_LIMIT_FLAG))?,
            (None, Some(env)) => parse_stack_limit(&env, STACK_LIMIT_ENV)?,
            (None, None) => DefaultArguments::default().stack_limit,
        };
        Ok(Arguments { stack_limit })
    }
}

fn parse_stack_limit(value: &str, source: &str) -> Result<usize, ArgumentsError> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err(ArgumentsError::Validation(format!(
            "The stack limit given by {source} must be greater than zero."
        ))),
        Ok(limit) => Ok(limit),
        Err(_) => Err(ArgumentsError::Validation(format!(
            "The stack limit given by {source} is not a number of bytes: ‘{value}’."
        ))),
    }
}

pub fn help(parser: &Options) -> String {
    let mut help = format!(
        r##"
USAGE:
    <FUZZ_DRIVER> [OPTIONS]

The stack limit protects the fuzzer from inputs that recurse deeply enough
to overflow the stack of the thread running the code under test. When the
limit is exceeded, the process prints the measured usage and aborts.
It can also be set with the {env} environment variable.
"##,
        env = STACK_LIMIT_ENV,
    );
    help += parser.usage("").as_str();
    help += format!(
        r#"

EXAMPLES:

{env}=65536 <FUZZ_DRIVER>
    Abort as soon as the code under test uses more than 64KiB of stack.

<FUZZ_DRIVER> --{stack_limit} 1048576
    Allow up to 1MiB of stack, overriding {env}.
"#,
        env = STACK_LIMIT_ENV,
        stack_limit = STACK_LIMIT_FLAG,
    )
    .as_str();
    help
}

#[derive(Clone)]
pub enum ArgumentsError {
    Parsing(Fail),
    Validation(String),
    WantsHelp,
}

impl Debug for ArgumentsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as Display>::fmt(self, f)
    }
}
impl Display for ArgumentsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgumentsError::Parsing(e) => {
                write!(
                    f,
                    "{}
To display the help, pass --{}",
                    e, HELP_FLAG
                )
            }
            ArgumentsError::Validation(e) => {
                write!(
                    f,
                    "{}
To display the help, pass --{}",
                    e, HELP_FLAG
                )
            }
            ArgumentsError::WantsHelp => {
                write!(f, "Help requested.")
            }
        }
    }
}
impl Error for ArgumentsError {}

impl From<Fail> for ArgumentsError {
    fn from(e: Fail) -> Self {
        Self::Parsing(e)
    }
}
