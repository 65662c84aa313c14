//! Extension → source-language classification.
//!
//! [`Language`] is a closed set of languages that have a language-aware
//! splitting strategy. Each variant carries its own suffix list and its own
//! boundary-separator priority list, consumed by [`crate::chunk`]. Files whose
//! extension maps to no variant are treated as plain text.
//!
//! [`AllowList`] is the set of extensions the repository loader accepts: every
//! language suffix plus [`TEXT_EXTENSIONS`].

use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Js,
    Java,
    Cpp,
    CSharp,
    Php,
    Ruby,
    Rust,
    Go,
    Scala,
    Kotlin,
    Lua,
    Perl,
    Elixir,
    Cobol,
}

/// Trailing separators shared by every language: paragraphs, lines, words, characters.
const GENERIC_TAIL: [&str; 4] = ["\n\n", "\n", " ", ""];

impl Language {
    pub const ALL: [Language; 15] = [
        Language::Python,
        Language::Js,
        Language::Java,
        Language::Cpp,
        Language::CSharp,
        Language::Php,
        Language::Ruby,
        Language::Rust,
        Language::Go,
        Language::Scala,
        Language::Kotlin,
        Language::Lua,
        Language::Perl,
        Language::Elixir,
        Language::Cobol,
    ];

    /// Extensions (without the leading dot, lower-case) owned by this language.
    pub fn suffixes(self) -> &'static [&'static str] {
        match self {
            Language::Python => &["py", "pyx", "pyi"],
            Language::Js => &["js", "jsx", "ts", "tsx"],
            Language::Java => &["java"],
            Language::Cpp => &["cpp", "cc", "cxx", "h", "hpp"],
            Language::CSharp => &["cs"],
            Language::Php => &["php"],
            Language::Ruby => &["rb"],
            Language::Rust => &["rs"],
            Language::Go => &["go"],
            Language::Scala => &["scala"],
            Language::Kotlin => &["kt", "kts"],
            Language::Lua => &["lua"],
            Language::Perl => &["pl", "pm"],
            Language::Elixir => &["ex", "exs"],
            Language::Cobol => &["cob", "cbl"],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Js => "js",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Scala => "scala",
            Language::Kotlin => "kotlin",
            Language::Lua => "lua",
            Language::Perl => "perl",
            Language::Elixir => "elixir",
            Language::Cobol => "cobol",
        }
    }

    /// Classify an extension, with or without its leading dot. Case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.suffixes().contains(&ext.as_str()))
    }

    pub fn from_path(path: &Path) -> Option<Language> {
        extension_of(path).and_then(|ext| Language::from_extension(&ext))
    }

    /// Boundary separators in priority order: top-level declarations first,
    /// then control-flow statements, then the generic paragraph/line/word/char tail.
    pub fn separators(self) -> Vec<&'static str> {
        let structural: &[&str] = match self {
            Language::Python => &["\nclass ", "\ndef ", "\n\tdef ", "\n    def "],
            Language::Js => &[
                "\nexport ",
                "\nfunction ",
                "\nconst ",
                "\nlet ",
                "\nvar ",
                "\nclass ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nswitch ",
                "\ncase ",
                "\ndefault ",
            ],
            Language::Java => &[
                "\nclass ",
                "\npublic ",
                "\nprotected ",
                "\nprivate ",
                "\nstatic ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nswitch ",
                "\ncase ",
            ],
            Language::Cpp => &[
                "\nclass ",
                "\nstruct ",
                "\nnamespace ",
                "\nvoid ",
                "\nint ",
                "\nfloat ",
                "\ndouble ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nswitch ",
                "\ncase ",
            ],
            Language::CSharp => &[
                "\nnamespace ",
                "\ninterface ",
                "\nenum ",
                "\nclass ",
                "\nabstract ",
                "\npublic ",
                "\nprotected ",
                "\nprivate ",
                "\nstatic ",
                "\nreturn ",
                "\nif ",
                "\nfor ",
                "\nforeach ",
                "\nwhile ",
                "\nswitch ",
                "\ncase ",
                "\ntry ",
                "\ncatch ",
            ],
            Language::Php => &[
                "\nfunction ",
                "\nclass ",
                "\nif ",
                "\nforeach ",
                "\nwhile ",
                "\ndo ",
                "\nswitch ",
                "\ncase ",
            ],
            Language::Ruby => &[
                "\nmodule ",
                "\nclass ",
                "\ndef ",
                "\nif ",
                "\nunless ",
                "\nwhile ",
                "\nfor ",
                "\ndo ",
                "\nbegin ",
                "\nrescue ",
            ],
            Language::Rust => &[
                "\nmod ",
                "\nimpl ",
                "\ntrait ",
                "\nstruct ",
                "\nenum ",
                "\npub fn ",
                "\nfn ",
                "\nconst ",
                "\nstatic ",
                "\nlet ",
                "\nif ",
                "\nwhile ",
                "\nfor ",
                "\nloop ",
                "\nmatch ",
            ],
            Language::Go => &[
                "\nfunc ",
                "\ntype ",
                "\nvar ",
                "\nconst ",
                "\nif ",
                "\nfor ",
                "\nswitch ",
                "\ncase ",
            ],
            Language::Scala => &[
                "\nclass ",
                "\nobject ",
                "\ntrait ",
                "\ndef ",
                "\nval ",
                "\nvar ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nmatch ",
                "\ncase ",
            ],
            Language::Kotlin => &[
                "\nclass ",
                "\nobject ",
                "\npublic ",
                "\nprotected ",
                "\nprivate ",
                "\ninternal ",
                "\ncompanion ",
                "\nfun ",
                "\nval ",
                "\nvar ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nwhen ",
                "\nelse ",
            ],
            Language::Lua => &[
                "\nlocal function ",
                "\nfunction ",
                "\nlocal ",
                "\nif ",
                "\nfor ",
                "\nwhile ",
                "\nrepeat ",
            ],
            Language::Perl => &[
                "\npackage ",
                "\nsub ",
                "\nmy ",
                "\nif ",
                "\nunless ",
                "\nforeach ",
                "\nwhile ",
            ],
            Language::Elixir => &[
                "\ndefmodule ",
                "\ndefprotocol ",
                "\ndefmacro ",
                "\ndefmacrop ",
                "\ndef ",
                "\ndefp ",
                "\nif ",
                "\nunless ",
                "\ncase ",
                "\ncond ",
                "\nwith ",
                "\nfor ",
                "\ndo ",
            ],
            Language::Cobol => &[
                "\nIDENTIFICATION DIVISION.",
                "\nENVIRONMENT DIVISION.",
                "\nDATA DIVISION.",
                "\nPROCEDURE DIVISION.",
                "\nWORKING-STORAGE SECTION.",
                "\nLINKAGE SECTION.",
                "\nFILE SECTION.",
                "\nINPUT-OUTPUT SECTION.",
                "\nPERFORM ",
                "\nIF ",
                "\nMOVE ",
                "\nDISPLAY ",
            ],
        };

        structural
            .iter()
            .copied()
            .chain(GENERIC_TAIL.iter().copied())
            .collect()
    }
}

/// Plain-text formats accepted by the loader: documentation, configuration,
/// data interchange, markup/styling, shell and SQL.
pub const TEXT_EXTENSIONS: &[&str] = &[
    // documentation
    "txt", "text", "md", "markdown", "mdown", "mdx", "rst", "adoc", "asciidoc", "readme", "license",
    "changelog", "contributing",
    // configuration
    "json", "jsonc", "yaml", "yml", "toml", "ini", "cfg", "conf", "config", "lock", "env",
    "example", "local", "production",
    // data interchange
    "csv", "tsv", "tab", "xml", "xsd", "xslt", "rss", "atom", "feed",
    // markup and styling
    "html", "htm", "xhtml", "css", "scss", "sass", "less",
    // logs
    "log", "out", "err",
    // shell and SQL
    "sh", "bash", "zsh", "fish", "sql", "psql", "mysql",
    // tooling
    "dockerfile", "dockerignore", "gitignore", "gitattributes", "gitmodules",
];

/// Lower-cased extension of `path`, or for dot-files with no extension
/// (`.gitignore`, `.env`) the name after the leading dot.
pub fn extension_of(path: &Path) -> Option<String> {
    if let Some(ext) = path.extension() {
        return Some(ext.to_string_lossy().to_ascii_lowercase());
    }
    let name = path.file_name()?.to_string_lossy();
    name.strip_prefix('.')
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.to_ascii_lowercase())
}

/// Extensions (lower-case, no dot) the repository loader accepts.
#[derive(Debug, Clone)]
pub struct AllowList {
    extensions: HashSet<String>,
}

impl AllowList {
    /// Every language suffix plus [`TEXT_EXTENSIONS`].
    pub fn default_set() -> Self {
        let mut extensions: HashSet<String> = Language::ALL
            .iter()
            .flat_map(|lang| lang.suffixes().iter())
            .map(|s| s.to_string())
            .collect();
        extensions.extend(TEXT_EXTENSIONS.iter().map(|s| s.to_string()));
        Self { extensions }
    }

    pub fn allows(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::default_set()
    }
}
