// End-to-end pipeline tests: index a small e-commerce repository with the
// deterministic hashing embedder and the embedded store, then drive the
// retriever through the public library surface.

use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serial_test::serial;
use tempfile::TempDir;

use codecontext::config::Config;
use codecontext::embedding::provider_from_name;
use codecontext::encoder::Bm25fEncoder;
use codecontext::error::CoreError;
use codecontext::indexer::{IndexRequest, Indexer};
use codecontext::model::IndexSummary;
use codecontext::search::{CancelFlag, ResultKind, Retriever, SearchRequest, SearchResult};
use codecontext::store::{store_for_project, VectorStore};

fn write_fixture(root: &Path) {
    fs::create_dir_all(root.join("src/main/java")).unwrap();
    fs::create_dir_all(root.join("src/payments")).unwrap();
    fs::create_dir_all(root.join("src/shipping")).unwrap();
    fs::create_dir_all(root.join("src/customers")).unwrap();
    fs::create_dir_all(root.join("docs/business")).unwrap();
    fs::create_dir_all(root.join("config")).unwrap();

    fs::write(
        root.join("src/main/java/OrderService.java"),
        r#"package com.shop.orders;

import com.shop.payments.PaymentGateway;

/**
 * Order processing entry point: validates carts and runs the order
 * processing flow end to end.
 */
public class OrderService {

    private PaymentGateway gateway;

    /**
     * Runs the order processing flow for a single order.
     */
    public Receipt processOrder(Order order) {
        validateOrder(order);
        gateway.charge(order);
        return buildReceipt(order);
    }

    private void validateOrder(Order order) {
        if (order.isEmpty()) {
            throw new IllegalArgumentException("order has no items");
        }
    }
}
"#,
    )
    .unwrap();

    fs::write(
        root.join("src/main/java/OrderController.java"),
        r#"package com.shop.orders;

/**
 * REST API endpoints for order management.
 */
public class OrderController {

    /**
     * REST endpoint creating an order from a cart.
     */
    public Response createOrder(Request request) {
        return respond(service.processOrder(request.body()));
    }

    public Response getOrder(String id) {
        return respond(service.find(id));
    }
}
"#,
    )
    .unwrap();

    fs::write(
        root.join("src/payments/payment_gateway.py"),
        r#"class PaymentGateway:
    """Payment gateway integration for card charges and refunds."""

    def charge(self, order, amount):
        """Charge a card through the payment gateway."""
        token = self.tokenize(order)
        return submit_charge(token, amount)

    def refund(self, order):
        return submit_refund(order)
"#,
    )
    .unwrap();

    fs::write(
        root.join("src/shipping/calculateShipping.js"),
        r#"/**
 * Shipping cost calculation from order weight and destination zone.
 */
function calculateShipping(order, zone) {
    if (order.total >= FREE_SHIPPING_THRESHOLD) {
        return 0;
    }
    const base = baseRate(zone);
    return base * order.weight;
}

const FREE_SHIPPING_THRESHOLD = 50;
"#,
    )
    .unwrap();

    fs::write(
        root.join("src/customers/CustomerTier.kt"),
        r#"package com.shop.customers

enum class CustomerTier {
    BRONZE, SILVER, GOLD
}
"#,
    )
    .unwrap();

    fs::write(
        root.join("src/customers/CustomerService.kt"),
        r#"package com.shop.customers

/**
 * Customer tier discount system: maps spend to a tier and a discount.
 */
class CustomerService {

    fun tierFor(customer: Customer): CustomerTier {
        return when {
            customer.spend > 1000 -> CustomerTier.GOLD
            else -> CustomerTier.BRONZE
        }
    }

    fun discountFor(tier: CustomerTier): Double {
        return when (tier) {
            CustomerTier.GOLD -> 0.15
            else -> 0.0
        }
    }
}
"#,
    )
    .unwrap();

    fs::write(
        root.join("docs/business/order-flow.md"),
        r#"# Order Flow

The order processing flow moves a cart through checkout, payment and
fulfilment. `OrderService` owns the pipeline and settles payment through
the gateway before shipping labels are produced.
"#,
    )
    .unwrap();

    fs::write(
        root.join("docs/api-design.md"),
        r#"# REST API Design

Endpoints follow resource naming: `OrderController` exposes order
endpoints, and every endpoint design decision favours flat JSON bodies.
"#,
    )
    .unwrap();

    fs::write(
        root.join("docs/payment-gateway.md"),
        r#"# Payment Gateway Integration

The `PaymentGateway` integration retries charges three times with
exponential backoff before surfacing a failure.
"#,
    )
    .unwrap();

    fs::write(
        root.join("config/application.yaml"),
        r#"payment:
  api_key: ${PAYMENT_API_KEY}
  retries: 3

shipping:
  free_threshold: 50
"#,
    )
    .unwrap();
}

struct Pipeline {
    _data_dir: TempDir,
    repo: TempDir,
    project_id: String,
    config: Config,
}

impl Pipeline {
    fn new(project_id: &str) -> Self {
        let data_dir = TempDir::new().unwrap();
        std::env::set_var("CODECONTEXT_DATA_DIR", data_dir.path());
        let repo = TempDir::new().unwrap();
        write_fixture(repo.path());
        Self {
            _data_dir: data_dir,
            repo,
            project_id: project_id.to_string(),
            config: Config::default(),
        }
    }

    fn store(&self) -> Arc<dyn VectorStore> {
        store_for_project(&self.config.storage.provider, &self.project_id).unwrap()
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(
            self.store(),
            provider_from_name(
                &self.config.embeddings.provider,
                self.config.embeddings.dimension,
            )
            .unwrap(),
            Bm25fEncoder::with_defaults(),
            self.config.clone(),
        )
    }

    fn index(&self, incremental: bool) -> IndexSummary {
        self.indexer()
            .run(
                &IndexRequest {
                    path: self.repo.path().to_path_buf(),
                    project_id: self.project_id.clone(),
                    incremental,
                },
                &no_cancel(),
            )
            .unwrap()
    }

    fn retriever(&self) -> Retriever {
        Retriever::new(
            self.store(),
            provider_from_name(
                &self.config.embeddings.provider,
                self.config.embeddings.dimension,
            )
            .unwrap(),
            Bm25fEncoder::with_defaults(),
            self.config.search.clone(),
        )
        .unwrap()
    }

    fn search(&self, query: &str, limit: usize) -> Vec<SearchResult> {
        self.retriever()
            .search(&SearchRequest::new(query, limit), &no_cancel())
            .unwrap()
    }
}

fn no_cancel() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

fn files_of(results: &[SearchResult]) -> Vec<String> {
    results.iter().map(|r| r.relative_path.clone()).collect()
}

#[test]
#[serial]
fn indexing_reports_full_fixture() {
    let pipeline = Pipeline::new("fixture");
    let summary = pipeline.index(false);

    assert_eq!(summary.files_indexed, 10);
    assert!(summary.objects >= 15, "objects: {}", summary.objects);
    assert!(summary.documents >= 6, "documents: {}", summary.documents);
    assert!(summary.relationships > 0);
    assert!(summary.errors.is_empty());
}

#[test]
#[serial]
fn order_processing_flow_finds_doc_and_service() {
    let pipeline = Pipeline::new("orders");
    pipeline.index(false);

    let results = pipeline.search("order processing flow", 10);
    let top3 = files_of(&results[..results.len().min(3)]);
    assert!(
        top3.iter().any(|f| f == "docs/business/order-flow.md"),
        "top-3 missing order-flow.md: {top3:?}"
    );
    assert!(
        top3.iter()
            .any(|f| f == "src/main/java/OrderService.java"),
        "top-3 missing OrderService.java: {top3:?}"
    );
}

#[test]
#[serial]
fn payment_gateway_integration_ranks_payment_files_first() {
    let pipeline = Pipeline::new("payments");
    pipeline.index(false);

    let results = pipeline.search("payment gateway integration", 10);
    assert!(!results.is_empty());
    let top = &results[0].relative_path;
    assert!(
        top == "src/payments/payment_gateway.py" || top == "docs/payment-gateway.md",
        "unexpected top result: {top}"
    );
    let top3 = files_of(&results[..results.len().min(3)]);
    let payment_hits = top3.iter().filter(|f| f.contains("payment")).count();
    assert!(payment_hits >= 2, "precision@3 too low: {top3:?}");
}

#[test]
#[serial]
fn customer_tier_discount_finds_both_kotlin_files() {
    let pipeline = Pipeline::new("customers");
    pipeline.index(false);

    let results = pipeline.search("customer tier discount system", 10);
    let top5 = files_of(&results[..results.len().min(5)]);
    assert!(
        top5.iter().any(|f| f == "src/customers/CustomerTier.kt"),
        "top-5 missing CustomerTier.kt: {top5:?}"
    );
    assert!(
        top5.iter().any(|f| f == "src/customers/CustomerService.kt"),
        "top-5 missing CustomerService.kt: {top5:?}"
    );
}

#[test]
#[serial]
fn shipping_cost_query_finds_calculator() {
    let pipeline = Pipeline::new("shipping");
    pipeline.index(false);

    let results = pipeline.search("shipping cost calculation logic", 10);
    let top3 = files_of(&results[..results.len().min(3)]);
    assert!(
        top3.iter().any(|f| f == "src/shipping/calculateShipping.js"),
        "top-3 missing calculateShipping.js: {top3:?}"
    );
}

#[test]
#[serial]
fn rest_api_query_finds_design_doc_and_controller() {
    let pipeline = Pipeline::new("restapi");
    pipeline.index(false);

    let results = pipeline.search("REST API endpoints and design", 10);
    let top5 = files_of(&results[..results.len().min(5)]);
    assert!(
        top5.iter().any(|f| f == "docs/api-design.md"),
        "top-5 missing api-design.md: {top5:?}"
    );
    assert!(
        top5.iter()
            .any(|f| f == "src/main/java/OrderController.java"),
        "top-5 missing OrderController.java: {top5:?}"
    );
}

#[test]
#[serial]
fn empty_query_errors_without_store_call() {
    let pipeline = Pipeline::new("empty");
    pipeline.index(false);

    let err = pipeline
        .retriever()
        .search(&SearchRequest::new("", 5), &no_cancel())
        .unwrap_err();
    let core = err.downcast_ref::<CoreError>().unwrap();
    assert_eq!(core.kind(), "empty_query");
    assert_eq!(core.exit_code(), 1);
}

#[test]
#[serial]
fn projects_are_isolated() {
    let data_dir = TempDir::new().unwrap();
    std::env::set_var("CODECONTEXT_DATA_DIR", data_dir.path());
    let config = Config::default();

    // Project A: the normal fixture.
    let repo_a = TempDir::new().unwrap();
    write_fixture(repo_a.path());

    // Project B: one file with a term that exists nowhere in A.
    let repo_b = TempDir::new().unwrap();
    fs::create_dir_all(repo_b.path().join("src")).unwrap();
    fs::write(
        repo_b.path().join("src/zebra_migrations.py"),
        "def run_zebra_migrations():\n    \"\"\"Zebra migrations runner.\"\"\"\n    apply_zebra_schema()\n",
    )
    .unwrap();

    for (project, repo) in [("iso-a", &repo_a), ("iso-b", &repo_b)] {
        let store = store_for_project(&config.storage.provider, project).unwrap();
        let provider = provider_from_name(
            &config.embeddings.provider,
            config.embeddings.dimension,
        )
        .unwrap();
        Indexer::new(store, provider, Bm25fEncoder::with_defaults(), config.clone())
            .run(
                &IndexRequest {
                    path: repo.path().to_path_buf(),
                    project_id: project.into(),
                    incremental: false,
                },
                &no_cancel(),
            )
            .unwrap();
    }

    let store_a = store_for_project(&config.storage.provider, "iso-a").unwrap();
    let provider = provider_from_name(
        &config.embeddings.provider,
        config.embeddings.dimension,
    )
    .unwrap();
    let retriever_a = Retriever::new(
        store_a,
        provider,
        Bm25fEncoder::with_defaults(),
        config.search.clone(),
    )
    .unwrap();

    let results = retriever_a
        .search(&SearchRequest::new("zebra migrations runner", 10), &no_cancel())
        .unwrap();
    assert!(
        results.iter().all(|r| !r.relative_path.contains("zebra")),
        "project A leaked results from project B"
    );
}

#[test]
#[serial]
fn incremental_sync_replaces_only_the_modified_file() {
    let pipeline = Pipeline::new("delta");
    pipeline.index(false);

    let unchanged_before: Vec<String> = pipeline
        .search("customer tier discount system", 10)
        .iter()
        .filter(|r| r.relative_path.ends_with(".kt"))
        .map(|r| r.id.clone())
        .collect();
    assert!(!unchanged_before.is_empty());

    fs::write(
        pipeline.repo.path().join("src/shipping/calculateShipping.js"),
        r#"/**
 * Shipping cost calculation, flat-rate edition.
 */
function calculateShipping(order, zone) {
    return flatRate(zone);
}
"#,
    )
    .unwrap();

    let summary = pipeline.index(true);
    assert_eq!(summary.files_indexed, 1, "only the modified file re-embeds");
    assert_eq!(summary.files_deleted, 0);

    // The modified file's points reflect the new content.
    let mut request = SearchRequest::new("shipping cost calculation", 10);
    request.file_path = Some("calculateShipping".into());
    let shipping = pipeline.retriever().search(&request, &no_cancel()).unwrap();
    assert!(!shipping.is_empty());
    assert!(
        shipping.iter().any(|r| r.content.contains("flatRate")),
        "updated content not indexed"
    );
    assert!(
        shipping.iter().all(|r| !r.content.contains("FREE_SHIPPING_THRESHOLD")),
        "stale points survived the incremental sync"
    );

    // Unchanged files keep identical ids.
    let unchanged_after: Vec<String> = pipeline
        .search("customer tier discount system", 10)
        .iter()
        .filter(|r| r.relative_path.ends_with(".kt"))
        .map(|r| r.id.clone())
        .collect();
    for id in &unchanged_before {
        assert!(
            unchanged_after.contains(id),
            "unchanged entity id drifted: {id}"
        );
    }
}

#[test]
#[serial]
fn diversity_bound_holds_in_rankings() {
    let pipeline = Pipeline::new("diversity");
    pipeline.index(false);

    let config = &pipeline.config.search;
    for query in [
        "order processing flow",
        "payment gateway integration",
        "customer tier discount system",
    ] {
        let results = pipeline.search(query, 10);
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for result in results.iter().skip(config.diversity_preserve_top_n) {
            if result.result_type == ResultKind::Code {
                *counts.entry(result.relative_path.as_str()).or_default() += 1;
            }
        }
        for (file, count) in counts {
            assert!(
                count <= config.max_chunks_per_file,
                "{query}: {file} appears {count} times"
            );
        }
    }
}

#[test]
#[serial]
fn relationships_survive_the_round_trip() {
    let pipeline = Pipeline::new("relations");
    pipeline.index(false);

    let retriever = pipeline.retriever();
    let results = pipeline.search("payment gateway integration", 10);
    let gateway = results
        .iter()
        .find(|r| r.name == "PaymentGateway")
        .expect("PaymentGateway class in results");

    let (records, total) = retriever.relationships_of(&gateway.id, 10);
    assert!(total > 0, "expected stored relationships");
    assert!(
        records.iter().any(|r| r.relation == "contains"),
        "class should contain its methods: {records:?}"
    );
}

#[test]
#[serial]
fn config_nodes_carry_env_references() {
    let pipeline = Pipeline::new("confignodes");
    pipeline.index(false);

    let mut request = SearchRequest::new("payment api key retries", 10);
    request.file_path = Some("application.yaml".into());
    let results = pipeline.retriever().search(&request, &no_cancel()).unwrap();
    assert!(
        results
            .iter()
            .any(|r| r.type_label == "config_key" && r.content.contains("PAYMENT_API_KEY")),
        "config section not indexed: {:?}",
        files_of(&results)
    );
}

#[test]
#[serial]
fn graph_expansion_can_surface_documented_code() {
    let pipeline = Pipeline::new("expansion");
    pipeline.index(false);

    // The order-flow document mentions OrderService; expansion should be
    // able to pull one in when the other ranks.
    let results = pipeline.search("checkout fulfilment pipeline", 10);
    let has_doc = results
        .iter()
        .any(|r| r.relative_path == "docs/business/order-flow.md");
    if has_doc {
        let expanded: Vec<&SearchResult> =
            results.iter().filter(|r| r.graph_expanded).collect();
        // Expansion is score-gated, so only assert consistency.
        for result in expanded {
            assert!(result.scoring.graph_score.is_some());
        }
    }
}
