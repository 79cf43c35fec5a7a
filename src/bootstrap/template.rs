//! Per-language launcher scripts.
//!
//! Each launcher drops privileges through the staged helper library, installs
//! the syscall filter (the helper reads `ALLOWED_SYSCALLS`), decodes the
//! payload with the key from its launch arguments and runs it.
//!
//! Launch arguments are `<script> <lib_root> <key>`.

/// Parameters substituted into a launcher.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapParams<'a> {
    pub uid: u32,
    pub gid: u32,
    pub enable_network: bool,
    /// Snippet run verbatim before user code, with full privileges
    pub preload: &'a str,
    /// Base64 cipher text
    pub payload: &'a str,
}

impl BootstrapParams<'_> {
    fn network_flag(&self) -> &'static str {
        if self.enable_network {
            "1"
        } else {
            "0"
        }
    }
}

/// Renders a launcher for one interpreter.
pub type TemplateFn = fn(&BootstrapParams<'_>) -> String;

/// File name of the helper inside a staging library root.
pub const HELPER_LIBRARY_NAME: &str = "libsandbox.so";

pub fn render_python(params: &BootstrapParams<'_>) -> String {
    format!(
        r#"import ctypes
import os
import sys
import traceback
from base64 import b64decode


def excepthook(exc_type, exc_value, exc_tb):
    sys.stderr.write("".join(traceback.format_exception(exc_type, exc_value, exc_tb)))
    sys.stderr.flush()
    sys.exit(-1)


sys.excepthook = excepthook

lib = ctypes.CDLL("./{helper}")
lib.sandbox_enter.argtypes = [ctypes.c_uint32, ctypes.c_uint32, ctypes.c_bool]
lib.sandbox_enter.restype = ctypes.c_int

os.chdir(sys.argv[1])

{preload}
if lib.sandbox_enter({uid}, {gid}, {network}) != 0:
    sys.stderr.write("failed to enter sandbox\n")
    sys.exit(-1)
if os.getuid() != {uid} or os.getgid() != {gid}:
    sys.stderr.write("privilege drop failed\n")
    sys.exit(-1)

key = b64decode(sys.argv[2])
code = bytearray(b64decode("{payload}"))
key_len = len(key)
for i in range(len(code)):
    code[i] ^= key[i % key_len]
del key, key_len, lib

exec(compile(bytes(code), "<sandbox>", "exec"), {{"__name__": "__main__"}})
"#,
        helper = HELPER_LIBRARY_NAME,
        preload = params.preload,
        uid = params.uid,
        gid = params.gid,
        network = params.network_flag(),
        payload = params.payload,
    )
}

pub fn render_nodejs(params: &BootstrapParams<'_>) -> String {
    format!(
        r#"const argv = process.argv;
const koffi = require('koffi');
const lib = koffi.load('./{helper}');
const sandboxEnter = lib.func('int sandbox_enter(uint32_t, uint32_t, bool)');

process.chdir(argv[2]);

{preload}
if (sandboxEnter({uid}, {gid}, {network} === 1) !== 0) {{
    process.stderr.write('failed to enter sandbox\n');
    process.exit(-1);
}}
if (process.getuid() !== {uid} || process.getgid() !== {gid}) {{
    process.stderr.write('privilege drop failed\n');
    process.exit(-1);
}}

const code = (() => {{
    const key = Buffer.from(argv[3], 'base64');
    const buf = Buffer.from('{payload}', 'base64');
    for (let i = 0; i < buf.length; i++) {{
        buf[i] ^= key[i % key.length];
    }}
    return buf.toString('utf8');
}})();

eval(code);
"#,
        helper = HELPER_LIBRARY_NAME,
        preload = params.preload,
        uid = params.uid,
        gid = params.gid,
        network = params.network_flag(),
        payload = params.payload,
    )
}
