// Licensed under the MIT License.

//! Command-line driver (§6): a small REPL over the four cluster commands
//! `init`/`prepare`/`execute`/`terminate`. A single `Session` owns one
//! in-process cluster built on `LocalFabric` — one `Host`, one `Worker` per
//! non-host peer each on its own thread, and their agents — for the whole
//! lifetime of the process, since §9's accepted simplification already
//! collapses the parent-child agent channel to same-process actors; this
//! extends that simplification one step further and keeps the four
//! commands as turns of one session rather than four independent processes
//! coordinating over persisted state the engine has no way to serialize.

mod reader;

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use meridian_engine::controller::host::Host;
use meridian_engine::controller::worker::Worker;
use meridian_engine::dataset::DataType;
use meridian_engine::fabric::{LocalFabric, Peer};
use meridian_engine::query::{JoinRelation, Query, QueryId};
use meridian_engine::shape::Geometry;
use meridian_engine::{Error, ErrorKind, Result};

#[derive(Parser)]
#[command(name = "meridian", no_binary_name = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Brings up the cluster with the listed peers; each name is appended with `:1`.
    Init {
        hosts: Vec<String>,
    },
    /// Prepares datasets and loads a query for the next `execute`.
    Prepare {
        #[arg(long = "queryType")]
        query_type: QueryTypeArg,
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long = "queryDataset")]
        query_dataset: Option<String>,
        #[arg(long = "leftDataset")]
        left_dataset: Option<String>,
        #[arg(long = "rightDataset")]
        right_dataset: Option<String>,
        #[arg(long = "spatialDataType", default_value = "point")]
        spatial_data_type: String,
        #[arg(long = "kValue")]
        k_value: Option<usize>,
        #[arg(long)]
        predicate: Option<String>,
    },
    /// Runs every query prepared since the last `execute` and prints the wall-clock duration.
    Execute,
    /// Finalizes the cluster.
    Terminate,
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryTypeArg {
    #[value(name = "rangeQuery")]
    Range,
    #[value(name = "knnQuery")]
    Knn,
    #[value(name = "spatialJoins")]
    SpatialJoins,
}

fn data_type_from_str(text: &str) -> Result<DataType> {
    match text.to_ascii_lowercase().as_str() {
        "point" => Ok(DataType::Point),
        "linestring" => Ok(DataType::LineString),
        "polygon" => Ok(DataType::Polygon),
        "box" => Ok(DataType::Box),
        other => Err(ErrorKind::Query.with_message(format!("unknown spatialDataType '{other}'"))),
    }
}

fn join_relation_from_predicate(predicate: &str) -> Result<JoinRelation> {
    match predicate.to_ascii_lowercase().as_str() {
        "equal" => Ok(JoinRelation::Equal),
        "contains" => Ok(JoinRelation::Contains),
        "inside" => Ok(JoinRelation::Inside),
        "overlap" | "intersect" => Ok(JoinRelation::Overlap),
        other => Err(ErrorKind::Query.with_message(format!("unknown predicate '{other}'"))),
    }
}

/// The running cluster plus bookkeeping a REPL turn needs: the next free
/// dataset id, and the queries `prepare` has queued for the next `execute`.
struct Session {
    fabric: Arc<LocalFabric>,
    host: Host,
    worker_handles: Vec<JoinHandle<()>>,
    next_dataset_id: i64,
    next_query_id: QueryId,
    pending: Vec<Query>,
}

impl Session {
    /// `init`: registers every peer's inbox, spawns a worker thread per
    /// non-host peer, and configures the host from `config_path` — §6 lists
    /// no `--config` flag, so the caller resolves it (from `MERIDIAN_CONFIG`,
    /// per §6's "environment variables" note, or `./cluster.ini` if unset)
    /// before calling in.
    fn init(hosts: Vec<String>, config_path: &str) -> Result<Self> {
        if hosts.is_empty() {
            return Err(ErrorKind::Configuration.with_message("init requires at least one host"));
        }
        let world_size = hosts.len() as u32;
        let fabric = Arc::new(LocalFabric::new());
        fabric.register(Peer::Host);
        fabric.register(Peer::Agent(0));

        let mut worker_handles = Vec::new();
        for rank in 1..world_size {
            fabric.register(Peer::Worker(rank));
            fabric.register(Peer::Agent(rank));
            let fabric = Arc::clone(&fabric);
            worker_handles.push(std::thread::spawn(move || {
                let mut worker = Worker::new(rank, world_size);
                if let Err(err) = worker.run(fabric.as_ref()) {
                    tracing::error!(rank, %err, "worker exited with an error");
                }
            }));
        }

        let mut host = Host::new(world_size);
        host.init();
        host.configure(config_path)?;

        Ok(Self {
            fabric,
            host,
            worker_handles,
            next_dataset_id: 1,
            next_query_id: 1,
            pending: Vec::new(),
        })
    }

    fn prepare(
        &mut self,
        query_type: QueryTypeArg,
        dataset: Option<String>,
        query_dataset: Option<String>,
        left_dataset: Option<String>,
        right_dataset: Option<String>,
        spatial_data_type: &str,
        k_value: Option<usize>,
        predicate: Option<String>,
    ) -> Result<()> {
        let data_type = data_type_from_str(spatial_data_type)?;

        let query = match query_type {
            QueryTypeArg::Range => {
                let path = dataset.ok_or_else(|| ErrorKind::Configuration.with_message("rangeQuery requires --dataset"))?;
                let dataset_id = self.load_dataset(&path, data_type)?;
                let window_path = query_dataset
                    .ok_or_else(|| ErrorKind::Configuration.with_message("rangeQuery requires --queryDataset for the window"))?;
                let window = first_geometry(&window_path)?;
                Query::Range { id: self.next_id(), dataset_id, window }
            }
            QueryTypeArg::Knn => {
                let path = dataset.ok_or_else(|| ErrorKind::Configuration.with_message("knnQuery requires --dataset"))?;
                let dataset_id = self.load_dataset(&path, data_type)?;
                let query_path = query_dataset
                    .ok_or_else(|| ErrorKind::Configuration.with_message("knnQuery requires --queryDataset for the query point"))?;
                let point = first_geometry(&query_path)?.centroid();
                let k = k_value.ok_or_else(|| ErrorKind::Configuration.with_message("knnQuery requires --kValue"))?;
                Query::Knn { id: self.next_id(), dataset_id, point, k }
            }
            QueryTypeArg::SpatialJoins => {
                let left_path = left_dataset
                    .ok_or_else(|| ErrorKind::Configuration.with_message("spatialJoins requires --leftDataset"))?;
                let right_path = right_dataset
                    .ok_or_else(|| ErrorKind::Configuration.with_message("spatialJoins requires --rightDataset"))?;
                let left_dataset_id = self.load_dataset(&left_path, data_type)?;
                let right_dataset_id = self.load_dataset(&right_path, data_type)?;
                let predicate = predicate.ok_or_else(|| ErrorKind::Configuration.with_message("spatialJoins requires --predicate"))?;

                if let Some(distance_text) = predicate.strip_prefix("distance:") {
                    let distance: f64 = distance_text
                        .parse()
                        .map_err(|_| ErrorKind::Configuration.with_message(format!("invalid distance '{distance_text}'")))?;
                    Query::DistanceJoin { id: self.next_id(), left_dataset_id, right_dataset_id, distance }
                } else if predicate.eq_ignore_ascii_case("pairs") {
                    Query::Join {
                        id: self.next_id(),
                        left_dataset_id,
                        right_dataset_id,
                        relation: JoinRelation::Overlap,
                        pairs: true,
                    }
                } else {
                    let relation = join_relation_from_predicate(&predicate)?;
                    Query::Join { id: self.next_id(), left_dataset_id, right_dataset_id, relation, pairs: false }
                }
            }
        };

        self.pending.push(query);
        Ok(())
    }

    fn load_dataset(&mut self, path: &str, data_type: DataType) -> Result<i64> {
        let shapes = reader::load_shapes(path)?;
        let internal_id = self.next_dataset_id;
        self.next_dataset_id += 1;
        self.host
            .prepare_dataset(self.fabric.as_ref(), internal_id, data_type, path, false, shapes)?;
        Ok(internal_id)
    }

    fn next_id(&mut self) -> QueryId {
        let id = self.next_query_id;
        self.next_query_id += 1;
        id
    }

    fn execute(&mut self) -> Result<()> {
        let queries = std::mem::take(&mut self.pending);
        for query in queries {
            let started = Instant::now();
            let result = self.host.execute_query(self.fabric.as_ref(), query)?;
            let elapsed = started.elapsed().as_secs_f64();
            println!("finished in {elapsed:.6} seconds, {} result(s)", result.result_count());
        }
        Ok(())
    }

    fn terminate(mut self) -> Result<()> {
        self.host.terminate(self.fabric.as_ref())?;
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
        Ok(())
    }
}

fn first_geometry(path: &str) -> Result<Geometry> {
    let shapes = reader::load_shapes(path)?;
    shapes
        .into_iter()
        .next()
        .map(|shape| shape.geometry)
        .ok_or_else(|| ErrorKind::Configuration.with_message(format!("'{path}' contains no shapes")))
}

fn run_command(session: &mut Option<Session>, command: Command) -> Result<()> {
    match command {
        Command::Init { hosts } => {
            let config_path = std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "cluster.ini".to_string());
            *session = Some(Session::init(hosts, &config_path)?);
            Ok(())
        }
        Command::Prepare {
            query_type,
            dataset,
            query_dataset,
            left_dataset,
            right_dataset,
            spatial_data_type,
            k_value,
            predicate,
        } => {
            let session = session
                .as_mut()
                .ok_or_else(|| ErrorKind::Configuration.with_message("prepare before init"))?;
            session.prepare(
                query_type,
                dataset,
                query_dataset,
                left_dataset,
                right_dataset,
                &spatial_data_type,
                k_value,
                predicate,
            )
        }
        Command::Execute => {
            let session = session
                .as_mut()
                .ok_or_else(|| ErrorKind::Configuration.with_message("execute before init"))?;
            session.execute()
        }
        Command::Terminate => {
            let session = session
                .take()
                .ok_or_else(|| ErrorKind::Configuration.with_message("terminate before init"))?;
            session.terminate()
        }
    }
}

/// Runs one already-tokenized command line, reporting §6's exact
/// `Error executing command 'X': <message>` format on failure.
fn dispatch_line(session: &mut Option<Session>, line: &str) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return true;
    }
    let command_name = tokens[0].to_string();
    match Cli::try_parse_from(tokens) {
        Ok(cli) => match run_command(session, cli.command) {
            Ok(()) => true,
            Err(err) => {
                report_error(&command_name, &err);
                false
            }
        },
        Err(clap_err) => {
            report_error(&command_name, &Error::from(ErrorKind::Configuration).with_message(clap_err.to_string()));
            false
        }
    }
}

fn report_error(command: &str, err: &Error) {
    eprintln!("Error executing command '{command}': {err}");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut session: Option<Session> = None;
    let mut had_error = false;
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => break,
        };
        if !dispatch_line(&mut session, &line) {
            had_error = true;
        }
        let _ = io::stdout().flush();
    }

    std::process::exit(if had_error { 1 } else { 0 });
}
