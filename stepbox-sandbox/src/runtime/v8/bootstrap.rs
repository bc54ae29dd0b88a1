//! Globals installed into every isolate before the program runs.
//!
//! The script captures the sandbox ops, installs the console, `print` and the
//! timer functions on top of them, publishes a frozen host object for the
//! program header to pick up, then removes `Deno` from the global scope.
//! Deferred callbacks restore the line that was current when they were
//! scheduled before they run.

pub const BOOTSTRAP_NAME: &str = "stepbox:bootstrap";

pub const BOOTSTRAP_JS: &str = r#"
((ops) => {
  "use strict";
  const apply = Reflect.apply;
  const originalThen = Promise.prototype.then;
  const resolved = Promise.resolve();

  const bindLine = (callback) => {
    if (typeof callback !== "function") return callback;
    const line = ops.op_sandbox_current_line();
    return function (...args) {
      ops.op_sandbox_set_line(line);
      return apply(callback, this, args);
    };
  };

  const describe = (value) => {
    switch (typeof value) {
      case "string": return value;
      case "function": return `[Function: ${value.name || "anonymous"}]`;
      case "bigint": return `${value}n`;
      case "symbol": return value.toString();
      case "object":
        if (value === null) return "null";
        if (value instanceof Error) return `${value.name}: ${value.message}`;
        try {
          const text = JSON.stringify(value);
          return text === undefined ? String(value) : text;
        } catch (_) {
          return Array.isArray(value) ? "[Array]" : "[Object]";
        }
      default: return String(value);
    }
  };
  const emitter = (stream) => (...args) => {
    ops.op_sandbox_print(stream, args.map(describe).join(" "));
  };
  const out = emitter("stdout");
  const err = emitter("stderr");

  const define = (name, value) => Object.defineProperty(globalThis, name, {
    value, writable: true, configurable: true, enumerable: false,
  });

  define("console", Object.freeze({ log: out, info: out, debug: out, trace: out, warn: err, error: err }));
  define("print", out);

  const timers = new Set();
  let nextTimer = 1;
  const schedule = (callback, delay, args, repeat) => {
    if (typeof callback !== "function") throw new TypeError("The callback must be a function");
    const id = nextTimer++;
    const ms = Math.max(0, Number(delay) || 0);
    const line = ops.op_sandbox_current_line();
    timers.add(id);
    const arm = () => {
      apply(originalThen, ops.op_sandbox_sleep(ms), [() => {
        if (!timers.has(id)) return;
        if (!repeat) timers.delete(id);
        ops.op_sandbox_set_line(line);
        apply(callback, globalThis, args);
        if (repeat && timers.has(id)) arm();
      }]);
    };
    arm();
    return id;
  };
  const clear = (id) => { timers.delete(id); };

  define("setTimeout", (callback, delay, ...args) => schedule(callback, delay, args, false));
  define("setInterval", (callback, delay, ...args) => schedule(callback, delay, args, true));
  define("clearTimeout", clear);
  define("clearInterval", clear);
  define("queueMicrotask", (callback) => {
    if (typeof callback !== "function") throw new TypeError("The callback must be a function");
    apply(originalThen, resolved, [bindLine(callback)]);
  });

  Object.defineProperty(Promise.prototype, "then", {
    value: function then(onFulfilled, onRejected) {
      return apply(originalThen, this, [bindLine(onFulfilled), bindLine(onRejected)]);
    },
    writable: true, configurable: true, enumerable: false,
  });

  Object.defineProperty(globalThis, "__stepboxHost", {
    value: Object.freeze({
      step: (line) => ops.op_sandbox_step(line),
      pause: (line) => ops.op_sandbox_pause(line),
      snapshot: (line, inEntry, payload) => ops.op_sandbox_snapshot(line, inEntry, payload),
      args: () => ops.op_sandbox_args(),
    }),
    writable: false, configurable: true, enumerable: false,
  });

  delete globalThis.Deno;
  delete globalThis.__bootstrap;
})(Deno.core.ops);
"#;
