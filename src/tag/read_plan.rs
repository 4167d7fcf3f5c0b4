//! Read plans: what to search, on which antennas, with which protocol, and
//! how search time is divided between competing sub-plans.

use crate::tag::filter::TagFilter;
use crate::tag::tagop::TagOp;
use crate::tag::TagProtocol;

/// A single-protocol search over a list of antennas.
#[derive(Debug, Clone, Default)]
pub struct SimpleReadPlan {
    /// Logical antennas to search. Empty means auto-detect.
    pub antennas: Vec<u8>,
    pub protocol: TagProtocol,
    pub filter: Option<TagFilter>,
    /// Operation executed against each singulated tag during the inventory.
    pub tag_op: Option<TagOp>,
    /// Share of the total read time relative to sibling plans.
    pub weight: u32,
}

impl SimpleReadPlan {
    pub fn new(antennas: Vec<u8>, protocol: TagProtocol, weight: u32) -> SimpleReadPlan {
        SimpleReadPlan {
            antennas,
            protocol,
            filter: None,
            tag_op: None,
            weight,
        }
    }
}

/// An ordered list of sub-plans sharing one read timeout.
#[derive(Debug, Clone, Default)]
pub struct MultiReadPlan {
    pub plans: Vec<ReadPlan>,
    /// Share of the total read time when this plan is itself nested.
    pub weight: u32,
}

impl MultiReadPlan {
    pub fn new(plans: Vec<ReadPlan>) -> MultiReadPlan {
        MultiReadPlan { plans, weight: 1 }
    }

    /// Sum of the direct children's weights.
    pub fn total_weight(&self) -> u32 {
        self.plans.iter().map(ReadPlan::weight).sum()
    }

    /// True when every child is a simple plan and all weights are zero: the
    /// whole plan collapses into one multi-protocol search command.
    pub fn is_multi_protocol_search(&self) -> bool {
        self.total_weight() == 0
            && self
                .plans
                .iter()
                .all(|p| matches!(p, ReadPlan::Simple(_)))
    }
}

/// The read plan attached to a reader.
#[derive(Debug, Clone)]
pub enum ReadPlan {
    Simple(SimpleReadPlan),
    Multi(MultiReadPlan),
}

impl ReadPlan {
    /// A plan's weight for time division inside a multi-plan.
    pub fn weight(&self) -> u32 {
        match self {
            ReadPlan::Simple(p) => p.weight,
            ReadPlan::Multi(p) => p.weight,
        }
    }
}

impl Default for ReadPlan {
    /// The post-connect default: all antennas, Gen2, weight 1.
    fn default() -> Self {
        ReadPlan::Simple(SimpleReadPlan::new(Vec::new(), TagProtocol::Gen2, 1))
    }
}
