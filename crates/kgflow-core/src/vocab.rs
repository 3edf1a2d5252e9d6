//! Vocabulary IRIs recognized by the engine.
//!
//! Workflows are described with the `kgf:` namespace. The prefix registry at
//! the bottom is what SPARQL prefix injection and the Turtle serializer use
//! when a document does not declare its own prefixes.

pub const KGF_NS: &str = "https://kgflow.dev/ns#";
pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS_NS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const XSD_NS: &str = "http://www.w3.org/2001/XMLSchema#";

pub mod rdf {
    pub const TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    pub const FIRST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#first";
    pub const REST: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#rest";
    pub const NIL: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#nil";
    pub const LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
}

pub mod xsd {
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const INT: &str = "http://www.w3.org/2001/XMLSchema#int";
    pub const LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
    pub const SHORT: &str = "http://www.w3.org/2001/XMLSchema#short";
    pub const NON_NEGATIVE_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#nonNegativeInteger";
    pub const POSITIVE_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#positiveInteger";
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    pub const DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    pub const FLOAT: &str = "http://www.w3.org/2001/XMLSchema#float";
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
    pub const DATE: &str = "http://www.w3.org/2001/XMLSchema#date";
}

pub mod kgf {
    // Classes
    pub const HOOK: &str = "https://kgflow.dev/ns#Hook";
    pub const PIPELINE: &str = "https://kgflow.dev/ns#Pipeline";
    pub const SPARQL_STEP: &str = "https://kgflow.dev/ns#SparqlStep";
    pub const TEMPLATE_STEP: &str = "https://kgflow.dev/ns#TemplateStep";
    pub const FILE_STEP: &str = "https://kgflow.dev/ns#FileStep";
    pub const HTTP_STEP: &str = "https://kgflow.dev/ns#HttpStep";
    pub const CLI_STEP: &str = "https://kgflow.dev/ns#CliStep";
    pub const OUTPUT_STEP: &str = "https://kgflow.dev/ns#OutputStep";

    // Predicate kinds
    pub const ASK: &str = "https://kgflow.dev/ns#Ask";
    pub const THRESHOLD: &str = "https://kgflow.dev/ns#Threshold";
    pub const RESULT_DELTA: &str = "https://kgflow.dev/ns#ResultDelta";
    pub const SHAPE_CONFORMANCE: &str = "https://kgflow.dev/ns#ShapeConformance";

    // Hook properties
    pub const TITLE: &str = "https://kgflow.dev/ns#title";
    pub const HAS_PREDICATE: &str = "https://kgflow.dev/ns#hasPredicate";
    pub const ORDERED_PIPELINES: &str = "https://kgflow.dev/ns#orderedPipelines";
    /// Named lock held for the whole execution.
    pub const LOCK: &str = "https://kgflow.dev/ns#lock";

    // Pipeline properties
    pub const STEPS: &str = "https://kgflow.dev/ns#steps";

    // Step properties
    pub const TEXT: &str = "https://kgflow.dev/ns#text";
    pub const PATH: &str = "https://kgflow.dev/ns#path";
    pub const QUERY: &str = "https://kgflow.dev/ns#query";
    pub const TEMPLATE: &str = "https://kgflow.dev/ns#template";
    pub const TEMPLATE_PATH: &str = "https://kgflow.dev/ns#templatePath";
    pub const OUTPUT_PATH: &str = "https://kgflow.dev/ns#outputPath";
    pub const FILE_PATH: &str = "https://kgflow.dev/ns#filePath";
    pub const OPERATION: &str = "https://kgflow.dev/ns#operation";
    pub const CONTENT: &str = "https://kgflow.dev/ns#content";
    pub const SOURCE_PATH: &str = "https://kgflow.dev/ns#sourcePath";
    pub const TARGET_PATH: &str = "https://kgflow.dev/ns#targetPath";
    pub const URL: &str = "https://kgflow.dev/ns#url";
    pub const METHOD: &str = "https://kgflow.dev/ns#method";
    pub const HEADERS: &str = "https://kgflow.dev/ns#headers";
    pub const BODY: &str = "https://kgflow.dev/ns#body";
    pub const COMMAND: &str = "https://kgflow.dev/ns#command";
    pub const CWD: &str = "https://kgflow.dev/ns#cwd";
    pub const TIMEOUT: &str = "https://kgflow.dev/ns#timeout";
    pub const ENV: &str = "https://kgflow.dev/ns#env";
    pub const FORMAT: &str = "https://kgflow.dev/ns#format";
    pub const INPUT_MAPPING: &str = "https://kgflow.dev/ns#inputMapping";
    pub const OUTPUT_MAPPING: &str = "https://kgflow.dev/ns#outputMapping";
    pub const DEPENDS_ON: &str = "https://kgflow.dev/ns#dependsOn";
    pub const FROM: &str = "https://kgflow.dev/ns#from";
    pub const TO: &str = "https://kgflow.dev/ns#to";
    pub const RETRY: &str = "https://kgflow.dev/ns#retry";
    pub const BACKOFF: &str = "https://kgflow.dev/ns#backoff";
    pub const CONTINUE_ON_ERROR: &str = "https://kgflow.dev/ns#continueOnError";

    // Predicate properties
    pub const MIN: &str = "https://kgflow.dev/ns#min";
    pub const MAX: &str = "https://kgflow.dev/ns#max";
    pub const THRESHOLD_VALUE: &str = "https://kgflow.dev/ns#threshold";
    pub const OPERATOR: &str = "https://kgflow.dev/ns#operator";
    pub const CONSTRAINT: &str = "https://kgflow.dev/ns#constraint";

    // Shape constraint properties
    pub const TARGET_CLASS: &str = "https://kgflow.dev/ns#targetClass";
    pub const FOCUS_NODE: &str = "https://kgflow.dev/ns#focusNode";
    pub const ON_PATH: &str = "https://kgflow.dev/ns#onPath";
    pub const MIN_COUNT: &str = "https://kgflow.dev/ns#minCount";
    pub const MAX_COUNT: &str = "https://kgflow.dev/ns#maxCount";
    pub const HAS_VALUE: &str = "https://kgflow.dev/ns#hasValue";
    pub const DATATYPE: &str = "https://kgflow.dev/ns#datatype";
    pub const IN: &str = "https://kgflow.dev/ns#in";
}

/// Well-known prefixes, in injection order.
pub const WELL_KNOWN_PREFIXES: &[(&str, &str)] = &[
    ("rdf", RDF_NS),
    ("rdfs", RDFS_NS),
    ("xsd", XSD_NS),
    ("owl", "http://www.w3.org/2002/07/owl#"),
    ("kgf", KGF_NS),
    ("foaf", "http://xmlns.com/foaf/0.1/"),
    ("dc", "http://purl.org/dc/elements/1.1/"),
    ("dcterms", "http://purl.org/dc/terms/"),
    ("skos", "http://www.w3.org/2004/02/skos/core#"),
    ("schema", "https://schema.org/"),
    ("prov", "http://www.w3.org/ns/prov#"),
    ("sh", "http://www.w3.org/ns/shacl#"),
    ("git", "http://example.org/git#"),
    ("ex", "http://example.org/"),
];

/// Local name of an IRI: the part after the last `#` or `/`.
pub fn local_name(iri: &str) -> &str {
    let cut = iri.rfind(['#', '/']).map(|i| i + 1).unwrap_or(0);
    if cut >= iri.len() {
        iri
    } else {
        &iri[cut..]
    }
}
