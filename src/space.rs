//! Degree-of-freedom layouts of (mixed) function spaces.
use crate::comm::{Comm, Communicator};
use crate::index_set::DistributedIndexSet;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// The distributed shape of a vector or of one side of an operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Layout {
    pub global_size: usize,
    pub local_size: usize,
    pub block_size: usize,
}

/// One field of a function space: a (possibly vector-valued) unknown.
///
/// The field's degrees of freedom on a process are `local_nodes * block_size` values, stored
/// node-major: the dof for component `c` of node `n` is `n * block_size + c`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    local_nodes: usize,
    block_size: usize,
}

impl Field {
    pub fn new(name: impl Into<String>, local_nodes: usize, block_size: usize) -> Self {
        assert!(block_size > 0, "Block size must be positive");
        Self {
            name: name.into(),
            local_nodes,
            block_size,
        }
    }

    pub fn scalar(name: impl Into<String>, local_nodes: usize) -> Self {
        Self::new(name, local_nodes, 1)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_nodes(&self) -> usize {
        self.local_nodes
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn local_dofs(&self) -> usize {
        self.local_nodes * self.block_size
    }
}

/// A function space made of one or more fields.
///
/// On every process the owned degrees of freedom are the concatenation of the local dofs of
/// each field, in field order. Globally, the blocks owned by the processes are concatenated in
/// rank order. The global index of every dof can therefore be computed on any process from
/// the per-rank field sizes, which are gathered when the space is constructed.
#[derive(Debug)]
pub struct FunctionSpace {
    comm: Comm,
    fields: Vec<Field>,
    /// `field_dofs[rank][field]`: number of dofs of `field` owned by `rank`.
    field_dofs: Vec<Vec<usize>>,
    /// `rank_offsets[rank]`: global index of the first dof owned by `rank`.
    rank_offsets: Vec<usize>,
    layout: Layout,
    field_index_sets: Vec<DistributedIndexSet>,
}

impl FunctionSpace {
    /// Constructs a space from its local fields. Collective.
    ///
    /// Every process must pass the same number of fields, with the same names and block sizes;
    /// only the local node counts may differ.
    pub fn new(comm: Comm, fields: Vec<Field>) -> Arc<Self> {
        assert!(!fields.is_empty(), "A function space needs at least one field");
        let local_counts: Vec<usize> = fields.iter().map(Field::local_dofs).collect();
        let gathered = comm.all_gather_varcount_usize(&local_counts);
        let field_dofs: Vec<Vec<usize>> = gathered
            .chunks(fields.len())
            .map(<[usize]>::to_vec)
            .collect();
        assert_eq!(
            field_dofs.len(),
            comm.size(),
            "All processes must construct spaces with the same number of fields"
        );

        let mut rank_offsets = Vec::with_capacity(field_dofs.len());
        let mut offset = 0;
        for counts in &field_dofs {
            rank_offsets.push(offset);
            offset += counts.iter().sum::<usize>();
        }
        let global_size = offset;
        let local_size = local_counts.iter().sum();
        let block_size = match fields.as_slice() {
            [single] => single.block_size,
            _ => 1,
        };

        let start = rank_offsets[comm.rank()];
        let mut field_start = start;
        let field_index_sets = local_counts
            .iter()
            .map(|&count| {
                let set = DistributedIndexSet::from_range(Arc::clone(&comm), field_start..field_start + count);
                field_start += count;
                set
            })
            .collect();

        Arc::new(Self {
            comm,
            fields,
            field_dofs,
            rank_offsets,
            layout: Layout {
                global_size,
                local_size,
                block_size,
            },
            field_index_sets,
        })
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    /// The global indices owned by this process.
    pub fn ownership_range(&self) -> Range<usize> {
        self.ownership_range_of(self.comm.rank())
    }

    /// The global indices owned by `rank`.
    pub fn ownership_range_of(&self, rank: usize) -> Range<usize> {
        let start = self.rank_offsets[rank];
        start..start + self.field_dofs[rank].iter().sum::<usize>()
    }

    /// Positions of the dofs of `field` within the local part of a vector on this space.
    pub fn field_local_range(&self, field: usize) -> Range<usize> {
        let counts = &self.field_dofs[self.comm.rank()];
        let start = counts[..field].iter().sum();
        start..start + counts[field]
    }

    /// Global indices of the dofs of `field` owned by `rank`.
    pub fn field_global_range(&self, rank: usize, field: usize) -> Range<usize> {
        let counts = &self.field_dofs[rank];
        let start = self.rank_offsets[rank] + counts[..field].iter().sum::<usize>();
        start..start + counts[field]
    }

    /// The index sets of each field, in field order.
    pub fn field_index_sets(&self) -> &[DistributedIndexSet] {
        &self.field_index_sets
    }

    /// The index set of the whole space.
    pub fn index_set(&self) -> DistributedIndexSet {
        DistributedIndexSet::concatenate(&self.field_index_sets)
    }

    /// The space made of the given fields, in the given order. Collective.
    pub fn restrict(&self, fields: &[usize]) -> Arc<FunctionSpace> {
        let selected = fields.iter().map(|&i| self.fields[i].clone()).collect();
        FunctionSpace::new(Arc::clone(&self.comm), selected)
    }

    /// Whether both spaces have the same fields and distribution on every process. Collective.
    pub fn collective_eq(&self, other: &FunctionSpace) -> bool {
        let local_eq = self.fields == other.fields && self.layout == other.layout;
        self.comm.all_reduce_and(local_eq)
    }
}
