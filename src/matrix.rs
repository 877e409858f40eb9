//! The operator host: shell matrices whose operations are provided by a context object.
use crate::error::Error;
use crate::index_set::DistributedIndexSet;
use crate::space::Layout;
use crate::vector::DistributedVector;
use std::any::Any;
use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::io::Write;

/// Scope of the diagnostics returned by [`ShellContext::get_info`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum InfoType {
    /// Values of the calling process only.
    Local,
    /// Maximum over all processes.
    GlobalMax,
    /// Sum over all processes.
    #[default]
    GlobalSum,
}

impl TryFrom<i32> for InfoType {
    type Error = Error;

    /// Converts the host's integer codes (1: local, 2: global max, 3: global sum).
    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Local),
            2 => Ok(Self::GlobalMax),
            3 => Ok(Self::GlobalSum),
            other => Err(Error::InvalidArgument(format!("Unknown info type {}", other))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct MatInfo {
    /// Bytes of memory held by the operator.
    pub memory: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ViewerType {
    Ascii,
    Binary,
}

/// A sink for diagnostic output.
pub trait Viewer {
    fn viewer_type(&self) -> ViewerType;

    /// Writes text to the viewer. Only called on ASCII viewers.
    fn print_ascii(&mut self, text: &str) -> io::Result<()>;
}

/// A viewer writing text to any [`Write`] implementation.
#[derive(Debug)]
pub struct AsciiViewer<W> {
    writer: W,
}

impl<W: Write> AsciiViewer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Viewer for AsciiViewer<W> {
    fn viewer_type(&self) -> ViewerType {
        ViewerType::Ascii
    }

    fn print_ascii(&mut self, text: &str) -> io::Result<()> {
        self.writer.write_all(text.as_bytes())
    }
}

/// The operations a context must provide to back a [`ShellMatrix`].
pub trait ShellContext: fmt::Debug + Any {
    fn row_layout(&self) -> Layout;

    fn col_layout(&self) -> Layout;

    /// Block sizes of the rows and columns.
    fn block_size(&self) -> (usize, usize);

    /// `y <- A x`
    fn mult(&self, x: &DistributedVector, y: &mut DistributedVector) -> Result<(), Error>;

    /// `x <- A^T y`
    fn mult_transpose(&self, y: &DistributedVector, x: &mut DistributedVector) -> Result<(), Error>;

    /// Describes the operator on `viewer`. Does nothing without a viewer, or if the viewer
    /// does not accept text.
    fn view(&self, viewer: Option<&mut dyn Viewer>) -> Result<(), Error>;

    /// Memory diagnostics. `None` means [`InfoType::GlobalSum`]. Collective for the global
    /// scopes.
    fn get_info(&self, info: Option<InfoType>) -> Result<MatInfo, Error>;

    /// Extracts the sub-operator coupling the rows `row_is` to the columns `col_is`.
    ///
    /// If `target` is given, it is the sub-operator returned by a previous call with the same
    /// index sets, and is refreshed instead of rebuilt.
    fn create_sub_matrix(
        &self,
        row_is: &DistributedIndexSet,
        col_is: &DistributedIndexSet,
        target: Option<ShellMatrix>,
    ) -> Result<ShellMatrix, Error>;

    fn as_any(&self) -> &dyn Any;
}

/// A matrix whose operations are provided by a [`ShellContext`].
#[derive(Debug)]
pub struct ShellMatrix {
    context: Box<dyn ShellContext>,
    row_layout: Layout,
    col_layout: Layout,
    block_size: (usize, usize),
    assembly_state: u64,
}

impl ShellMatrix {
    pub fn new(context: impl ShellContext) -> Self {
        Self::from_boxed(Box::new(context))
    }

    pub fn from_boxed(context: Box<dyn ShellContext>) -> Self {
        Self {
            row_layout: context.row_layout(),
            col_layout: context.col_layout(),
            block_size: context.block_size(),
            context,
            assembly_state: 0,
        }
    }

    pub fn row_layout(&self) -> Layout {
        self.row_layout
    }

    pub fn col_layout(&self) -> Layout {
        self.col_layout
    }

    pub fn block_size(&self) -> (usize, usize) {
        self.block_size
    }

    pub fn context(&self) -> &dyn ShellContext {
        &*self.context
    }

    /// The context, if it has type `C`.
    pub fn context_as<C: ShellContext>(&self) -> Option<&C> {
        self.context.as_any().downcast_ref()
    }

    /// Marks the matrix as (re-)assembled. Shell matrices hold no values, so this only
    /// advances the assembly state observed by the host.
    pub fn assemble(&mut self) {
        self.assembly_state += 1;
    }

    /// Number of times the matrix has been assembled.
    pub fn assembly_state(&self) -> u64 {
        self.assembly_state
    }

    pub fn mult(&self, x: &DistributedVector, y: &mut DistributedVector) -> Result<(), Error> {
        self.context.mult(x, y)
    }

    pub fn mult_transpose(&self, y: &DistributedVector, x: &mut DistributedVector) -> Result<(), Error> {
        self.context.mult_transpose(y, x)
    }

    pub fn view(&self, viewer: Option<&mut dyn Viewer>) -> Result<(), Error> {
        self.context.view(viewer)
    }

    pub fn get_info(&self, info: Option<InfoType>) -> Result<MatInfo, Error> {
        self.context.get_info(info)
    }

    pub fn create_sub_matrix(
        &self,
        row_is: &DistributedIndexSet,
        col_is: &DistributedIndexSet,
        target: Option<ShellMatrix>,
    ) -> Result<ShellMatrix, Error> {
        self.context.create_sub_matrix(row_is, col_is, target)
    }
}
