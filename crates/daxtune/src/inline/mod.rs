use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;

pub mod lexer;

use lexer::{
    bracket_tokens, call_tokens, declared_names, define_keyword_end, first_evaluate_offset,
    mask_comments_and_strings, normalize_name,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeasureDefinition {
    pub name: String,
    pub table: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub expression: String,
}

pub trait NamedDefinition {
    fn name(&self) -> &str;
}

impl NamedDefinition for MeasureDefinition {
    fn name(&self) -> &str {
        &self.name
    }
}

impl NamedDefinition for FunctionDefinition {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<'a, T> {
    Found(&'a T),
    Ambiguous(&'a BTreeSet<String>),
    Missing,
}

#[derive(Debug, Clone)]
pub struct NameCatalog<T> {
    entries: Vec<T>,
    exact: HashMap<String, usize>,
    normalized: HashMap<String, usize>,
    collisions: BTreeMap<String, BTreeSet<String>>,
}

impl<T> Default for NameCatalog<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            exact: HashMap::new(),
            normalized: HashMap::new(),
            collisions: BTreeMap::new(),
        }
    }
}

impl<T: NamedDefinition> NameCatalog<T> {
    pub fn insert(&mut self, entry: T) {
        let exact_key = entry.name().to_lowercase();
        if exact_key.trim().is_empty() || self.exact.contains_key(&exact_key) {
            return;
        }
        let normalized_key = normalize_name(entry.name());
        let index = self.entries.len();

        if let Some(&existing) = self.normalized.get(&normalized_key) {
            let names = self.collisions.entry(normalized_key).or_default();
            names.insert(self.entries[existing].name().to_string());
            names.insert(entry.name().to_string());
        } else {
            self.normalized.insert(normalized_key, index);
        }
        self.exact.insert(exact_key, index);
        self.entries.push(entry);
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Lookup<'_, T> {
        if let Some(&index) = self.exact.get(&name.to_lowercase()) {
            return Lookup::Found(&self.entries[index]);
        }
        let key = normalize_name(name);
        if let Some(names) = self.collisions.get(&key) {
            return Lookup::Ambiguous(names);
        }
        match self.normalized.get(&key) {
            Some(&index) => Lookup::Found(&self.entries[index]),
            None => Lookup::Missing,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn collisions(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.collisions
    }
}

impl<T: NamedDefinition> FromIterator<T> for NameCatalog<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut catalog = Self::default();
        for entry in iter {
            catalog.insert(entry);
        }
        catalog
    }
}

#[derive(Debug, Clone, Default)]
pub struct DefinitionCatalog {
    pub measures: NameCatalog<MeasureDefinition>,
    pub functions: NameCatalog<FunctionDefinition>,
}

impl DefinitionCatalog {
    #[must_use]
    pub fn new(
        measures: impl IntoIterator<Item = MeasureDefinition>,
        functions: impl IntoIterator<Item = FunctionDefinition>,
    ) -> Self {
        Self {
            measures: measures.into_iter().collect(),
            functions: functions.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousReference {
    pub reference: String,
    pub kind: &'static str,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InliningResult {
    pub query: String,
    pub functions: Vec<FunctionDefinition>,
    pub measures: Vec<MeasureDefinition>,
    pub ambiguous: Vec<AmbiguousReference>,
}

impl InliningResult {
    #[must_use]
    pub fn unchanged(query: &str) -> Self {
        Self {
            query: query.to_string(),
            functions: Vec::new(),
            measures: Vec::new(),
            ambiguous: Vec::new(),
        }
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        !self.functions.is_empty() || !self.measures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Candidate {
    Measure(String),
    Function(String),
}

fn candidates(masked: &str) -> impl Iterator<Item = Candidate> {
    bracket_tokens(masked)
        .into_iter()
        .map(Candidate::Measure)
        .chain(call_tokens(masked).into_iter().map(Candidate::Function))
}

#[derive(Debug)]
struct Coverage {
    declared: HashSet<String>,
    declared_keys: HashSet<String>,
    emitted: HashSet<String>,
}

impl Coverage {
    fn new(declared: HashSet<String>) -> Self {
        Self {
            declared_keys: declared.iter().map(|name| normalize_name(name)).collect(),
            declared,
            emitted: HashSet::new(),
        }
    }

    /// Records `definition` for emission unless the query or an earlier pass has it.
    /// A declaration only stands in for a differently spelled definition when no
    /// other definition shares its normalized key.
    fn claim<T: NamedDefinition>(&mut self, catalog: &NameCatalog<T>, definition: &T) -> bool {
        let exact = definition.name().to_lowercase();
        if self.declared.contains(&exact) || self.emitted.contains(&exact) {
            return false;
        }
        let key = normalize_name(definition.name());
        if self.declared_keys.contains(&key) && !catalog.collisions().contains_key(&key) {
            return false;
        }
        self.emitted.insert(exact)
    }
}

type AmbiguousIndex = BTreeMap<(&'static str, String), (String, Vec<String>)>;

fn resolve<'a, T: NamedDefinition>(
    reference: &str,
    kind: &'static str,
    catalog: &'a NameCatalog<T>,
    coverage: &mut Coverage,
    ambiguous: &mut AmbiguousIndex,
) -> Option<&'a T> {
    let key = normalize_name(reference);
    if key.is_empty() {
        return None;
    }
    match catalog.lookup(reference) {
        Lookup::Found(definition) => coverage.claim(catalog, definition).then_some(definition),
        Lookup::Ambiguous(names) => {
            if !coverage.declared_keys.contains(&key) {
                ambiguous
                    .entry((kind, key))
                    .or_insert_with(|| (reference.to_string(), names.iter().cloned().collect()));
            }
            None
        }
        Lookup::Missing => None,
    }
}

#[must_use]
pub fn inline_dependencies(query: &str, catalog: &DefinitionCatalog) -> InliningResult {
    let masked = mask_comments_and_strings(query);
    let Some(evaluate_at) = first_evaluate_offset(&masked) else {
        return InliningResult::unchanged(query);
    };

    // The whole text, not only the preamble, so an EVALUATE inside a function body cannot truncate it.
    let declared = declared_names(&masked);
    let mut measure_coverage = Coverage::new(declared.measures);
    let mut function_coverage = Coverage::new(declared.functions);

    let mut queue = candidates(&masked).collect::<VecDeque<_>>();
    let mut measures = Vec::new();
    let mut functions = Vec::new();
    let mut ambiguous = AmbiguousIndex::new();

    while let Some(candidate) = queue.pop_front() {
        match candidate {
            Candidate::Measure(name) => {
                if let Some(definition) = resolve(
                    &name,
                    "measure",
                    &catalog.measures,
                    &mut measure_coverage,
                    &mut ambiguous,
                ) {
                    queue.extend(candidates(&mask_comments_and_strings(&definition.expression)));
                    measures.push(definition.clone());
                }
            }
            Candidate::Function(name) => {
                if let Some(definition) = resolve(
                    &name,
                    "function",
                    &catalog.functions,
                    &mut function_coverage,
                    &mut ambiguous,
                ) {
                    queue.extend(candidates(&mask_comments_and_strings(&definition.expression)));
                    functions.push(definition.clone());
                }
            }
        }
    }

    let ambiguous = ambiguous
        .into_iter()
        .map(|((kind, _), (reference, candidates))| AmbiguousReference {
            reference,
            kind,
            candidates,
        })
        .collect();

    if functions.is_empty() && measures.is_empty() {
        return InliningResult {
            ambiguous,
            ..InliningResult::unchanged(query)
        };
    }

    let query = splice_definitions(query, &masked, evaluate_at, &functions, &measures);
    InliningResult {
        query,
        functions,
        measures,
        ambiguous,
    }
}

fn splice_definitions(
    query: &str,
    masked: &str,
    evaluate_at: usize,
    functions: &[FunctionDefinition],
    measures: &[MeasureDefinition],
) -> String {
    let lines = functions
        .iter()
        .map(|function| format!("    FUNCTION {} = {}", function.name, function.expression.trim()))
        .chain(measures.iter().map(|measure| {
            format!(
                "    MEASURE {}[{}] = {}",
                quote_table(&measure.table),
                measure.name.replace(']', "]]"),
                measure.expression.trim()
            )
        }))
        .collect::<Vec<_>>()
        .join("\n");

    match define_keyword_end(&masked[..evaluate_at]) {
        Some(define_end) => {
            let (head, rest) = query.split_at(define_end);
            let separator = if rest.starts_with(['\n', '\r']) { "" } else { "\n" };
            format!("{head}\n{lines}{separator}{rest}")
        }
        None => {
            let (preamble, body) = query.split_at(evaluate_at);
            format!("{preamble}DEFINE\n{lines}\n\n{body}")
        }
    }
}

fn quote_table(table: &str) -> String {
    format!("'{}'", table.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::{
        DefinitionCatalog, FunctionDefinition, InliningResult, Lookup, MeasureDefinition,
        NameCatalog, inline_dependencies,
    };

    fn measure(name: &str, table: &str, expression: &str) -> MeasureDefinition {
        MeasureDefinition {
            name: name.to_string(),
            table: table.to_string(),
            expression: expression.to_string(),
        }
    }

    fn function(name: &str, expression: &str) -> FunctionDefinition {
        FunctionDefinition {
            name: name.to_string(),
            expression: expression.to_string(),
        }
    }

    fn sales_catalog() -> DefinitionCatalog {
        DefinitionCatalog::new(
            [
                measure("Margin", "Sales", "ApplyRate([Total Sales]) - [Total Cost]"),
                measure("Total Sales", "Sales", "SUMX(Sales, Sales[Qty] * Sales[Price])"),
                measure("Total Cost", "Sales", "SUM(Sales[Cost])"),
                measure("Unused", "Sales", "1"),
            ],
            [function("ApplyRate", "(x) => x * [Rate]")],
        )
    }

    fn count_occurrences(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn synthesizes_define_block_before_evaluate() {
        let catalog = DefinitionCatalog::new(
            [measure("Total Sales", "Sales", "SUMX(Sales, Sales[Qty] * Sales[Price])")],
            [],
        );
        let result = inline_dependencies(
            "EVALUATE\nSUMMARIZECOLUMNS('Date'[Year], \"Sales\", [Total Sales])",
            &catalog,
        );

        insta::assert_snapshot!(result.query, @r#"
        DEFINE
            MEASURE 'Sales'[Total Sales] = SUMX(Sales, Sales[Qty] * Sales[Price])

        EVALUATE
        SUMMARIZECOLUMNS('Date'[Year], "Sales", [Total Sales])
        "#);
    }

    #[test]
    fn resolves_transitive_closure_exactly_once() {
        let result = inline_dependencies("EVALUATE ROW(\"m\", [Margin], \"again\", [Margin])", &sales_catalog());

        let names = result
            .measures
            .iter()
            .map(|measure| measure.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Margin", "Total Sales", "Total Cost"]);
        assert_eq!(result.functions, vec![function("ApplyRate", "(x) => x * [Rate]")]);

        assert_eq!(count_occurrences(&result.query, "MEASURE 'Sales'[Margin] ="), 1);
        assert_eq!(count_occurrences(&result.query, "MEASURE 'Sales'[Total Sales] ="), 1);
        assert_eq!(count_occurrences(&result.query, "MEASURE 'Sales'[Total Cost] ="), 1);
        assert_eq!(count_occurrences(&result.query, "FUNCTION ApplyRate ="), 1);
        assert!(!result.query.contains("[Unused] ="));
    }

    #[test]
    fn second_pass_over_inlined_query_adds_nothing() {
        let catalog = sales_catalog();
        let first = inline_dependencies("EVALUATE ROW(\"m\", [Margin])", &catalog);
        assert!(first.changed());

        let second = inline_dependencies(&first.query, &catalog);
        assert!(!second.changed());
        assert_eq!(second.query, first.query);
    }

    #[test]
    fn splices_after_existing_define_and_keeps_comments() {
        let query = "// tuned by hand\nDEFINE\n    MEASURE 'Sales'[Total Cost] = 0\nEVALUATE ROW(\"m\", [Margin])";
        let result = inline_dependencies(query, &sales_catalog());

        assert!(result.query.starts_with("// tuned by hand\nDEFINE\n    FUNCTION ApplyRate ="));
        assert_eq!(count_occurrences(&result.query, "DEFINE"), 1);
        assert_eq!(count_occurrences(&result.query, "[Total Cost] ="), 1);
        assert!(result.query.contains("MEASURE 'Sales'[Total Cost] = 0"));
        assert!(result.query.ends_with("EVALUATE ROW(\"m\", [Margin])"));
    }

    #[test]
    fn define_on_same_line_gets_line_break() {
        let query = "DEFINE MEASURE 'Sales'[Other] = 1 EVALUATE ROW(\"c\", [Total Cost])";
        let result = inline_dependencies(query, &sales_catalog());
        assert!(result.query.starts_with(
            "DEFINE\n    MEASURE 'Sales'[Total Cost] = SUM(Sales[Cost])\n MEASURE 'Sales'[Other]"
        ));
    }

    #[test]
    fn evaluate_inside_string_literal_is_not_a_split_point() {
        let query = "DEFINE\n    FUNCTION ApplyRate = (x) => \"EVALUATE\" & x\n    MEASURE 'Sales'[Margin] = ApplyRate(1)\nEVALUATE ROW(\"m\", [Margin])";
        let result = inline_dependencies(query, &sales_catalog());
        assert!(!result.changed());
        assert_eq!(result.query, query);
    }

    #[test]
    fn query_without_model_references_is_unchanged() {
        let query = "EVALUATE TOPN(10, 'Sales', Sales[Qty])";
        assert_eq!(
            inline_dependencies(query, &sales_catalog()),
            InliningResult::unchanged(query)
        );
        assert_eq!(
            inline_dependencies("no query here [Margin]", &sales_catalog()),
            InliningResult::unchanged("no query here [Margin]")
        );
    }

    #[test]
    fn lookups_tolerate_quoting_and_case() {
        let result = inline_dependencies("EVALUATE ROW(\"c\", [total_cost])", &sales_catalog());
        assert_eq!(result.measures.len(), 1);
        assert_eq!(result.measures[0].name, "Total Cost");
    }

    #[test]
    fn colliding_normalized_names_are_flagged_not_guessed() {
        let catalog = DefinitionCatalog::new(
            [
                measure("Net-Sales", "Sales", "1"),
                measure("Net Sales", "Sales", "2"),
            ],
            [],
        );
        assert!(matches!(catalog.measures.lookup("net sales"), Lookup::Found(found) if found.expression == "2"));
        assert!(matches!(catalog.measures.lookup("NetSales"), Lookup::Ambiguous(_)));

        let result = inline_dependencies("EVALUATE ROW(\"n\", [NetSales])", &catalog);
        assert!(!result.changed());
        assert_eq!(result.ambiguous.len(), 1);
        assert_eq!(result.ambiguous[0].reference, "NetSales");
        assert_eq!(result.ambiguous[0].candidates, vec!["Net Sales", "Net-Sales"]);
    }

    #[test]
    fn distinct_names_sharing_a_key_are_both_inlined() {
        let catalog = DefinitionCatalog::new(
            [
                measure("Net-Sales", "Sales", "1"),
                measure("Net Sales", "Sales", "2"),
            ],
            [],
        );
        let result = inline_dependencies("EVALUATE ROW(\"a\", [Net Sales], \"b\", [Net-Sales])", &catalog);
        let names = result
            .measures
            .iter()
            .map(|measure| measure.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Net Sales", "Net-Sales"]);
        assert!(result.ambiguous.is_empty());

        let declared = "DEFINE\n    MEASURE 'Sales'[Net Sales] = 5\nEVALUATE ROW(\"b\", [Net-Sales], \"c\", [Net Sales])";
        let result = inline_dependencies(declared, &catalog);
        assert_eq!(result.measures, vec![measure("Net-Sales", "Sales", "1")]);
        assert_eq!(count_occurrences(&result.query, "[Net Sales] ="), 1);
    }

    #[test]
    fn declared_name_covers_a_differently_spelled_reference() {
        let query = "DEFINE\n    MEASURE 'Sales'[TotalCost] = 0\nEVALUATE ROW(\"c\", [Total Cost])";
        let result = inline_dependencies(query, &sales_catalog());
        assert!(!result.changed());
    }

    #[test]
    fn comment_markers_in_table_names_do_not_hide_references() {
        let query = "EVALUATE ROW(\"x\", CALCULATE(SUM(Sales[Qty]), 'Sales--Old'[Year] = 2024), \"y\", [Total Cost])";
        let result = inline_dependencies(query, &sales_catalog());
        assert_eq!(result.measures, vec![measure("Total Cost", "Sales", "SUM(Sales[Cost])")]);
        assert!(result.query.ends_with(query));
    }

    #[test]
    fn evaluate_inside_function_body_keeps_existing_definitions_whole() {
        let query = "DEFINE\n    FUNCTION ApplyRate = (t) => EVALUATE t\n    MEASURE 'Sales'[Margin] = ApplyRate([Total Cost])\nEVALUATE ROW(\"m\", [Margin])";
        let result = inline_dependencies(query, &sales_catalog());

        assert_eq!(result.measures, vec![measure("Total Cost", "Sales", "SUM(Sales[Cost])")]);
        assert!(result.functions.is_empty());
        assert_eq!(count_occurrences(&result.query, "DEFINE"), 1);
        assert_eq!(count_occurrences(&result.query, "[Margin] ="), 1);
        assert_eq!(count_occurrences(&result.query, "FUNCTION ApplyRate"), 1);
        assert!(result.query.contains("FUNCTION ApplyRate = (t) => EVALUATE t\n    MEASURE 'Sales'[Margin] = ApplyRate([Total Cost])"));
    }

    #[test]
    fn duplicate_exact_names_keep_first_definition() {
        let catalog: NameCatalog<MeasureDefinition> =
            [measure("Rate", "A", "1"), measure("rate", "B", "2")]
                .into_iter()
                .collect();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.collisions().is_empty());
    }
}
