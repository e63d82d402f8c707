use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ark_bn254::G1Projective as Curve;
use clap::{Parser, ValueEnum};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use unlynx::aggregation::{aggregation_list_proof_creation, column_sums};
use unlynx::deterministic_tag::TaggingNode;
use unlynx::protocols::{
    generate_tagging_nodes, CollectiveAggregationProtocol, DeterministicTaggingProtocol,
    KeySwitchingProtocol, ProofsVerificationProtocol, ProtocolContext, ShufflingProtocol,
};
use unlynx::records::{
    attach_tags, from_shuffle_matrix, group_records, responses_to_vector, tagging_input,
    to_shuffle_matrix, vector_to_responses, ClientRecord, GroupedData,
};
use unlynx::{CipherVector, DiscreteLogTable, KeyPair, LocalTree, ProofsToVerify, RunConfig};

const LOG_TARGET: &str = "bin::unlynx_sim";
const MAX_ATTRIBUTE_VALUE: i64 = 10;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Topology {
    Star,
    Line,
}

#[derive(Debug, Parser)]
#[command(name = "unlynx_sim")]
#[command(about = "Run collection rounds over an in-process tree of nodes", long_about = None)]
struct Args {
    /// Number of nodes in the tree
    #[arg(long, env = "UNLYNX_NODES", default_value_t = 3)]
    nodes: usize,

    /// Client records held by each node
    #[arg(long, env = "UNLYNX_RECORDS_PER_NODE", default_value_t = 10)]
    records_per_node: usize,

    #[arg(long, value_enum, env = "UNLYNX_TOPOLOGY", default_value_t = Topology::Star)]
    topology: Topology,

    /// Run configuration, TOML or (with a `.json` extension) JSON
    #[arg(long, env = "UNLYNX_CONFIG")]
    config: Option<PathBuf>,

    /// Optional RNG seed for reproducible keys and records
    #[arg(long, env = "UNLYNX_RNG_SEED")]
    rng_seed: Option<u64>,

    /// Seconds to wait for any single protocol run
    #[arg(long, env = "UNLYNX_TIMEOUT_SECS", default_value_t = 300)]
    timeout_secs: u64,

    /// Toggle structured (JSON) logs
    #[arg(long, env = "UNLYNX_LOG_JSON", default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let args = Args::parse();
    init_tracing(args.json)?;
    let config = load_config(args.config.as_deref())?;
    if args.nodes == 0 || args.records_per_node == 0 {
        bail!("at least one node holding at least one record is required");
    }

    let mut rng = args
        .rng_seed
        .map(StdRng::seed_from_u64)
        .unwrap_or_else(StdRng::from_entropy);
    let keys: Vec<KeyPair<Curve>> = (0..args.nodes).map(|_| KeyPair::generate(&mut rng)).collect();
    let tree = Arc::new(match args.topology {
        Topology::Star => LocalTree::star(keys),
        Topology::Line => LocalTree::line(keys),
    });
    let tagging_nodes = generate_tagging_nodes(&tree, &mut rng);
    let querier = KeyPair::<Curve>::generate(&mut rng);
    let bound = (args.nodes * args.records_per_node) as u64 * MAX_ATTRIBUTE_VALUE as u64
        + config.group_count;
    let table = DiscreteLogTable::new(bound).context("building the decryption table")?;

    info!(
        target: LOG_TARGET,
        nodes = args.nodes,
        records_per_node = args.records_per_node,
        topology = ?args.topology,
        ?config,
        "starting simulation"
    );

    let sim = Simulation {
        tree,
        tagging_nodes,
        querier,
        table,
        config,
        records_per_node: args.records_per_node,
        timeout: Duration::from_secs(args.timeout_secs),
    };
    for round in 0..sim.config.rounds {
        let started = Instant::now();
        sim.run_round(round, &mut rng)
            .await
            .with_context(|| format!("round {round} failed"))?;
        info!(
            target: LOG_TARGET,
            round,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "round complete"
        );
    }
    Ok(())
}

fn load_dotenv() {
    let manifest_env = env!("CARGO_MANIFEST_DIR");
    let manifest_env_path = PathBuf::from(manifest_env).join(".env");
    dotenv::from_filename(manifest_env_path).ok();
    dotenv::dotenv().ok();
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::fmt().with_env_filter(filter).with_target(false);

    if json {
        builder.json().flatten_event(true).init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let parsed = match path.extension().and_then(|ext| ext.to_str()) {
                Some("json") => RunConfig::from_json(&text),
                _ => RunConfig::from_toml(&text),
            };
            parsed.with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(RunConfig::default()),
    }
}

struct Simulation {
    tree: Arc<LocalTree<Curve>>,
    tagging_nodes: Vec<Arc<TaggingNode<Curve>>>,
    querier: KeyPair<Curve>,
    table: DiscreteLogTable<Curve>,
    config: RunConfig,
    records_per_node: usize,
    timeout: Duration,
}

impl Simulation {
    /// Generates records under the collective key and returns them with the
    /// plaintext column totals.
    fn synthetic_records(&self, rng: &mut StdRng) -> (Vec<ClientRecord<Curve>>, Vec<i64>) {
        let public_key = self.tree.roster().aggregate();
        let count = self.records_per_node * self.tree.node_count();
        let mut totals = vec![0; self.config.aggregating_attr_count];
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            let grouping: Vec<i64> = (0..self.config.group_attr_count)
                .map(|_| rng.gen_range(0..self.config.group_count.max(1)) as i64)
                .collect();
            let aggregating: Vec<i64> = (0..self.config.aggregating_attr_count)
                .map(|_| rng.gen_range(0..MAX_ATTRIBUTE_VALUE))
                .collect();
            for (total, value) in totals.iter_mut().zip(&aggregating) {
                *total += value;
            }
            records.push(ClientRecord {
                grouping: CipherVector::encrypt_ints(public_key, &grouping, rng),
                non_deterministic: CipherVector::default(),
                aggregating: CipherVector::encrypt_ints(public_key, &aggregating, rng),
            });
        }
        (records, totals)
    }

    async fn run_round(&self, round: usize, rng: &mut StdRng) -> Result<()> {
        let context =
            ProtocolContext::new(Arc::clone(&self.tree), self.config.proofs_enabled, rng.gen());
        let (records, expected) = self.synthetic_records(rng);

        let started = Instant::now();
        let (matrix, layouts) = to_shuffle_matrix(&records);
        let shuffling = ShufflingProtocol::new(context.clone());
        shuffling.arm(matrix)?;
        let shuffled = shuffling
            .start()?
            .recv_timeout(self.timeout)
            .await
            .context("shuffling")?;
        let records = from_shuffle_matrix(&shuffled.records, &layouts)?;
        phase_done(round, "shuffling", started);

        let started = Instant::now();
        let tagging =
            DeterministicTaggingProtocol::new(context.clone(), self.tagging_nodes.clone())?;
        tagging.arm(tagging_input(&records))?;
        let tagged_output = tagging
            .start()?
            .recv_timeout(self.timeout)
            .await
            .context("deterministic tagging")?;
        let tagged = attach_tags(&tagged_output.tagged, &records)?;
        phase_done(round, "deterministic tagging", started);

        let started = Instant::now();
        let nodes = self.tree.node_count();
        let per_node = tagged.len().div_ceil(nodes).max(1);
        let mut local = tagged
            .chunks(per_node)
            .map(group_records)
            .collect::<Result<Vec<GroupedData<Curve>>, _>>()?;
        local.resize_with(nodes, GroupedData::new);
        let aggregating: Vec<CipherVector<Curve>> =
            records.iter().map(|record| record.aggregating.clone()).collect();
        let aggregation_proofs = if self.config.proofs_enabled {
            let sums = column_sums(&aggregating, self.config.aggregating_attr_count)?;
            aggregation_list_proof_creation(&aggregating, &sums)?
        } else {
            Vec::new()
        };
        let collective = CollectiveAggregationProtocol::new(context.clone());
        collective.arm(local)?;
        let aggregated = collective
            .start()?
            .recv_timeout(self.timeout)
            .await
            .context("collective aggregation")?;
        phase_done(round, "collective aggregation", started);

        let started = Instant::now();
        let responses: Vec<_> = aggregated.grouped.values().cloned().collect();
        let (flat, response_layouts) = responses_to_vector(&responses);
        let switching = KeySwitchingProtocol::new(context.clone());
        switching.arm(self.querier.public_key(), flat)?;
        let switched = switching
            .start()?
            .recv_timeout(self.timeout)
            .await
            .context("key switching")?;
        let results = vector_to_responses(&switched.switched, &response_layouts)?;
        phase_done(round, "key switching", started);

        let mut totals = vec![0; self.config.aggregating_attr_count];
        for response in &results {
            let grouping = self.querier.decrypt_ints(&response.grouping, &self.table)?;
            let values = self.querier.decrypt_ints(&response.aggregating, &self.table)?;
            debug!(target: LOG_TARGET, round, ?grouping, ?values, "group result");
            for (total, value) in totals.iter_mut().zip(&values) {
                *total += value;
            }
        }
        if totals != expected {
            bail!("decrypted totals {totals:?} do not match generated totals {expected:?}");
        }
        info!(target: LOG_TARGET, round, groups = results.len(), ?totals, "query answered");

        if self.config.proofs_enabled {
            let started = Instant::now();
            let bundle = ProofsToVerify {
                key_switching: switched.proofs,
                det_tag_creation: tagged_output.creation_proofs,
                det_tag_addition: tagged_output.addition_proofs,
                aggregation: aggregation_proofs,
                shuffling: shuffled.proofs,
                collective_aggregation: aggregated.proofs,
            };
            let proofs = bundle.len();
            let verdicts =
                ProofsVerificationProtocol::run(context, bundle, self.timeout).await?;
            let rejected = verdicts.iter().filter(|verdict| !**verdict).count();
            phase_done(round, "proofs verification", started);
            if rejected > 0 {
                bail!("{rejected} of {proofs} proofs were rejected");
            }
            info!(target: LOG_TARGET, round, proofs, "all proofs verified");
        }
        Ok(())
    }
}

fn phase_done(round: usize, phase: &str, started: Instant) {
    info!(
        target: LOG_TARGET,
        round,
        phase,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "phase complete"
    );
}
