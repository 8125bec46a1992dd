use gpucmd_hw::stream::DEFAULT_COMMAND_BUFFER_SIZE;

/// Creation parameters for a [`crate::CommandList`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandListDesc {
    /// Encode for the copy engine only; kernel launches are rejected.
    pub copy_only: bool,
    /// Submit and wait after every append.
    pub immediate: bool,
    /// Soft limit for [`crate::CommandList::reserve_space`].
    pub command_buffer_size: usize,
    pub label: Option<String>,
}

impl Default for CommandListDesc {
    fn default() -> Self {
        Self {
            copy_only: false,
            immediate: false,
            command_buffer_size: DEFAULT_COMMAND_BUFFER_SIZE,
            label: None,
        }
    }
}

impl CommandListDesc {
    pub fn copy_only() -> Self {
        Self {
            copy_only: true,
            ..Default::default()
        }
    }

    pub fn immediate() -> Self {
        Self {
            immediate: true,
            ..Default::default()
        }
    }
}
