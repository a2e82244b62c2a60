// Licensed under the MIT License.

//! Cluster configuration (§6): the INI file loaded once at startup into a
//! single explicit value, rather than read piecemeal from global state
//! (§9 — "a single process-wide configuration object... represented as an
//! explicit value the host constructs once and broadcasts").

use crate::partitioning::PartitioningMethod;
use crate::{ErrorKind, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvironmentKind {
    Local,
    Cluster,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentConfig {
    pub kind: EnvironmentKind,
    pub nodefile_path: Option<String>,
    pub node_count: u32,
}

/// `Partitioning.assignmentFunc`: `ST` is the only implemented strategy.
/// `OP` ("order-preserving") is named in §6 as "not implemented" — loading a
/// config that selects it is a `Configuration` error rather than a silent
/// fallback to `ST`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignmentFunc {
    Standard,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PartitioningConfig {
    pub path: String,
    pub batch_size: usize,
    pub method: PartitioningMethod,
    pub assignment_func: AssignmentFunc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub mbr_filter: bool,
    pub ifilter: bool,
    pub refinement: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mbr_filter: true,
            ifilter: false,
            refinement: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AprilConfig {
    pub n: u32,
    pub compression: bool,
    pub partitions: u32,
}

impl Default for AprilConfig {
    fn default() -> Self {
        Self {
            n: 12,
            compression: false,
            partitions: 1,
        }
    }
}

/// The fully-parsed, validated configuration, broadcast to every node at
/// `init` time (§4.6 "Ready (configuration broadcast complete)").
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterConfig {
    pub environment: EnvironmentConfig,
    pub partitioning: PartitioningConfig,
    pub pipeline: PipelineConfig,
    pub april: AprilConfig,
}

fn section<'a>(ini: &'a ini::Ini, name: &str) -> Result<&'a ini::Properties> {
    ini.section(Some(name))
        .ok_or_else(|| ErrorKind::Configuration.with_message(format!("missing [{name}] section")))
}

fn required<'a>(props: &'a ini::Properties, key: &str) -> Result<&'a str> {
    props
        .get(key)
        .ok_or_else(|| ErrorKind::Configuration.with_message(format!("missing key '{key}'")))
}

fn parse_u32(props: &ini::Properties, key: &str) -> Result<u32> {
    required(props, key)?
        .parse()
        .map_err(|_| ErrorKind::Configuration.with_message(format!("'{key}' must be a positive integer")))
}

fn parse_usize(props: &ini::Properties, key: &str) -> Result<usize> {
    required(props, key)?
        .parse()
        .map_err(|_| ErrorKind::Configuration.with_message(format!("'{key}' must be a positive integer")))
}

fn parse_bool_flag(props: &ini::Properties, key: &str) -> Result<bool> {
    match required(props, key)? {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ErrorKind::Configuration.with_message(format!("'{key}' must be 0 or 1, got '{other}'"))),
    }
}

impl ClusterConfig {
    /// Parses and validates an INI file per §6's table. `world_size` is
    /// needed to validate the partitioning grid's setup-time constraints
    /// (§4.1), so it must already be known (from `Environment.nodeCount` or
    /// the `init` peer list) by the time this runs.
    pub fn load(path: &str, world_size: u32) -> Result<Self> {
        let ini = ini::Ini::load_from_file(path).map_err(|err| ErrorKind::Configuration.with_source(err))?;

        let env_section = section(&ini, "Environment")?;
        let kind = match required(env_section, "type")? {
            "LOCAL" => EnvironmentKind::Local,
            "CLUSTER" => EnvironmentKind::Cluster,
            other => {
                return Err(ErrorKind::Configuration.with_message(format!("unknown Environment.type '{other}'")))
            }
        };
        let environment = EnvironmentConfig {
            kind,
            nodefile_path: env_section.get("nodefilePath").map(str::to_owned),
            node_count: parse_u32(env_section, "nodeCount")?,
        };

        let part_section = section(&ini, "Partitioning")?;
        let ppd = parse_u32(part_section, "ppdNum")?;
        let method = match required(part_section, "type")? {
            "RR" => PartitioningMethod::RoundRobin { ppd },
            "TWOGRID" => PartitioningMethod::TwoGrid {
                dgppd: parse_u32(part_section, "dgppdNum")?,
                ppd,
            },
            other => return Err(ErrorKind::Configuration.with_message(format!("unknown Partitioning.type '{other}'"))),
        };
        method.validate(world_size)?;
        let assignment_func = match required(part_section, "assignmentFunc")? {
            "ST" => AssignmentFunc::Standard,
            "OP" => {
                return Err(ErrorKind::Configuration
                    .with_message("Partitioning.assignmentFunc=OP is not implemented"))
            }
            other => {
                return Err(ErrorKind::Configuration
                    .with_message(format!("unknown Partitioning.assignmentFunc '{other}'")))
            }
        };
        let partitioning = PartitioningConfig {
            path: required(part_section, "path")?.to_owned(),
            batch_size: parse_usize(part_section, "batchSize")?,
            method,
            assignment_func,
        };

        let pipeline = match ini.section(Some("Pipeline")) {
            Some(props) => PipelineConfig {
                mbr_filter: parse_bool_flag(props, "MBRFilter")?,
                ifilter: parse_bool_flag(props, "IFilter")?,
                refinement: parse_bool_flag(props, "Refinement")?,
            },
            None => PipelineConfig::default(),
        };

        let april = match ini.section(Some("APRIL")) {
            Some(props) => {
                let n = parse_u32(props, "N")?;
                if !(10..=16).contains(&n) {
                    return Err(ErrorKind::Configuration.with_message("APRIL.N must be in [10,16]"));
                }
                let partitions = parse_u32(props, "partitions")?;
                if !(1..=32).contains(&partitions) {
                    return Err(ErrorKind::Configuration.with_message("APRIL.partitions must be in [1,32]"));
                }
                AprilConfig {
                    n,
                    compression: parse_bool_flag(props, "compression")?,
                    partitions,
                }
            }
            None => AprilConfig::default(),
        };

        Ok(ClusterConfig {
            environment,
            partitioning,
            pipeline,
            april,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_a_minimal_round_robin_config() {
        let file = write_ini(
            "[Environment]\ntype=LOCAL\nnodeCount=2\n\n\
             [Partitioning]\npath=/tmp/parts\nbatchSize=1000\ntype=RR\nppdNum=4\nassignmentFunc=ST\n",
        );
        let config = ClusterConfig::load(file.path().to_str().unwrap(), 2).unwrap();
        assert_eq!(config.environment.node_count, 2);
        assert_eq!(config.partitioning.method, PartitioningMethod::RoundRobin { ppd: 4 });
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn assignment_func_op_is_rejected() {
        let file = write_ini(
            "[Environment]\ntype=LOCAL\nnodeCount=2\n\n\
             [Partitioning]\npath=/tmp/parts\nbatchSize=1000\ntype=RR\nppdNum=4\nassignmentFunc=OP\n",
        );
        let err = ClusterConfig::load(file.path().to_str().unwrap(), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn invalid_partitioning_constraint_is_rejected_before_assignment_func() {
        let file = write_ini(
            "[Environment]\ntype=LOCAL\nnodeCount=4\n\n\
             [Partitioning]\npath=/tmp/parts\nbatchSize=1000\ntype=RR\nppdNum=1\nassignmentFunc=ST\n",
        );
        let err = ClusterConfig::load(file.path().to_str().unwrap(), 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Partitioning);
    }
}
