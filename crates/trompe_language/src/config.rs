//! Compiler and VM configuration.

/// Configuration for the compiler.
#[derive(Clone, Debug)]
pub struct CompilerConfig {
    /// Run the peephole pass that merges comparison + branch pairs.
    pub optimize: bool,
    /// Bound on address-assignment passes before giving up.
    pub max_address_passes: usize,
    /// File name recorded in compiled code.
    pub file: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            optimize: true,
            max_address_passes: 16,
            file: "<input>".to_string(),
        }
    }
}

impl CompilerConfig {
    /// Configuration with the peephole pass disabled, for inspecting raw output.
    #[must_use]
    pub fn unoptimized() -> Self {
        Self {
            optimize: false,
            ..Self::default()
        }
    }

    /// Builder method to enable or disable optimization.
    #[must_use]
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Builder method to set the address-pass bound.
    #[must_use]
    pub fn with_max_address_passes(mut self, passes: usize) -> Self {
        self.max_address_passes = passes;
        self
    }

    /// Builder method to set the file name.
    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }
}

/// Configuration for the VM.
#[derive(Clone, Debug)]
pub struct VmConfig {
    /// Slots reserved when the VM is created.
    pub initial_stack_capacity: usize,
    /// Slack added on top of a frame's needs whenever the stack grows.
    pub extra_frame_slots: usize,
    /// Fail with `FrameSizeExceeded` when a frame's working stack outgrows
    /// the compiled frame size.
    pub check_frame_size: bool,
    /// Emit a `trace` event for every dispatched instruction.
    pub trace_execution: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            initial_stack_capacity: 256,
            extra_frame_slots: 4,
            check_frame_size: false,
            trace_execution: false,
        }
    }
}

impl VmConfig {
    /// Configuration that verifies frame sizes on every push.
    #[must_use]
    pub fn checked() -> Self {
        Self {
            check_frame_size: true,
            ..Self::default()
        }
    }

    /// Builder method to set the initial stack capacity.
    #[must_use]
    pub fn with_initial_stack_capacity(mut self, capacity: usize) -> Self {
        self.initial_stack_capacity = capacity;
        self
    }

    /// Builder method to set the growth slack.
    #[must_use]
    pub fn with_extra_frame_slots(mut self, slots: usize) -> Self {
        self.extra_frame_slots = slots;
        self
    }

    /// Builder method to enable/disable frame-size checking.
    #[must_use]
    pub fn with_check_frame_size(mut self, check: bool) -> Self {
        self.check_frame_size = check;
        self
    }

    /// Builder method to enable/disable per-instruction tracing.
    #[must_use]
    pub fn with_trace_execution(mut self, trace: bool) -> Self {
        self.trace_execution = trace;
        self
    }
}
