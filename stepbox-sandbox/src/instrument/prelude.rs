//! JavaScript wrapped around the instrumented body.
//!
//! The header and footer never change line count with their parameters, so
//! compiled line numbers map back to source lines by a fixed offset.
//!
//! The host object and every capture helper live inside a closure; the body
//! only sees the frozen hooks object bound to `__SBX_HOOKS__`, whose name
//! carries the per-run nonce.
//!
//! Placeholders: `__SBX_HOOKS__` (hooks binding name), `__SBX_NONCE__` (JSON
//! string), `__SBX_NAMES__` (JSON array of captured names), `__SBX_LIMITS__`
//! (JSON object of capture bounds), `__SBX_ENTRY_NAME__` (JSON string) and
//! `__SBX_ENTRY__` (the validated entry identifier).

pub const PROGRAM_HEADER: &str = r#"(async () => {
const __SBX_HOOKS__ = ((host) => {
delete globalThis.__stepboxHost;
const nonce = __SBX_NONCE__;
const names = __SBX_NAMES__;
const limits = __SBX_LIMITS__;
const ids = new WeakMap();
let nextId = 1;
let inEntry = 0;
let capturing = 0;
function step(line) {
  if (capturing === 0) host.step(line);
}
function pause(line) {
  if (capturing === 0) host.pause(line);
}
function snap(line, thunks) {
  if (capturing !== 0) return;
  capturing++;
  try {
    const captured = [];
    for (let i = 0; i < thunks.length; i++) {
      let value;
      try {
        value = thunks[i]();
      } catch (_) {
        continue;
      }
      captured.push([names[i], field(() => value, limits.depth, limits.entries, limits.chars)]);
    }
    host.snapshot(line, inEntry > 0, JSON.stringify(captured));
  } catch (_) {
  } finally {
    capturing--;
  }
}
function idOf(value) {
  let id = ids.get(value);
  if (id === undefined) {
    id = nextId++;
    ids.set(value, id);
  }
  return id;
}
function className(value) {
  try {
    const proto = Object.getPrototypeOf(value);
    if (proto === null) return "Object";
    const ctor = proto.constructor;
    return typeof ctor === "function" && typeof ctor.name === "string" && ctor.name !== "" ? ctor.name : "Object";
  } catch (_) {
    return "Object";
  }
}
function fallback(error) {
  try {
    const reason = error instanceof Error ? error.message : String(error);
    return `[Unserializable: ${reason}]`;
  } catch (_) {
    return "[Unserializable]";
  }
}
function label(key) {
  try {
    return typeof key === "string" ? key : typeof key === "object" && key !== null ? `[${className(key)}]` : String(key);
  } catch (_) {
    return "[key]";
  }
}
function field(read, depth, entries, chars) {
  try {
    return capture(read(), depth, entries, chars);
  } catch (error) {
    return { t: "opaque", v: fallback(error) };
  }
}
function capture(value, depth, entries, chars) {
  switch (typeof value) {
    case "undefined": return { t: "undefined" };
    case "boolean": return { t: "bool", v: value };
    case "number": return Number.isFinite(value) ? { t: "number", v: value } : { t: "nonfinite", v: String(value) };
    case "string":
      return value.length > chars ? { t: "string", v: `${value.slice(0, chars)}... (${value.length} chars)` } : { t: "string", v: value };
    case "bigint": return { t: "bigint", v: value.toString() };
    case "symbol": return { t: "symbol", v: value.toString() };
    case "function": return { t: "function", name: value.name || "anonymous" };
  }
  if (value === null) return { t: "null" };
  const id = idOf(value);
  if (value instanceof Date) {
    return { t: "date", id, v: Number.isNaN(value.getTime()) ? "Invalid Date" : value.toISOString() };
  }
  const isArray = Array.isArray(value);
  const isView = !isArray && ArrayBuffer.isView(value) && typeof value.length === "number";
  const isSet = !isArray && !isView && value instanceof Set;
  const name = isArray ? "Array" : className(value);
  if (depth <= 0) return { t: "truncated", id, class: name, array: isArray || isView || isSet };
  if (isArray || isView) {
    const items = [];
    for (let i = 0; i < value.length && i < entries; i++) items.push(field(() => value[i], depth - 1, entries, chars));
    return { t: "array", id, class: name, len: value.length, items };
  }
  if (isSet) {
    const items = [];
    for (const item of value) {
      if (items.length >= entries) break;
      items.push(field(() => item, depth - 1, entries, chars));
    }
    return { t: "array", id, class: name, len: value.size, items };
  }
  const pairs = [];
  if (value instanceof Map) {
    for (const [key, item] of value) {
      if (pairs.length >= entries) break;
      pairs.push([label(key), field(() => item, depth - 1, entries, chars)]);
    }
    return { t: "object", id, class: name, total: value.size, entries: pairs };
  }
  if (value instanceof Error) {
    pairs.push(["name", field(() => value.name, depth - 1, entries, chars)]);
    pairs.push(["message", field(() => value.message, depth - 1, entries, chars)]);
  }
  let more = false;
  for (const key in value) {
    if (!Object.hasOwn(value, key)) continue;
    if (pairs.length >= entries) {
      more = true;
      break;
    }
    pairs.push([key, field(() => value[key], depth - 1, entries, chars)]);
  }
  return { t: "object", id, class: name, total: pairs.length, more, entries: pairs };
}
function describe(error) {
  try {
    if (error instanceof Error) return `${error.name}: ${error.message}`;
    return `Uncaught ${typeof error === "string" ? error : String(error)}`;
  } catch (_) {
    return "Uncaught exception";
  }
}
async function invoke(name, resolve) {
  let entry;
  try {
    entry = resolve();
  } catch (_) {
    throw new ReferenceError(`${name} is not defined`);
  }
  if (typeof entry !== "function") throw new TypeError(`${name} is not a function`);
  inEntry++;
  let value;
  try {
    value = await entry(...host.args());
  } finally {
    inEntry--;
  }
  capturing++;
  try {
    return JSON.stringify({ nonce, ok: true, value: field(() => value, limits.resultDepth, limits.resultEntries, Infinity) });
  } finally {
    capturing--;
  }
}
function fail(error) {
  capturing++;
  try {
    return JSON.stringify({ nonce, ok: false, message: describe(error) });
  } finally {
    capturing--;
  }
}
return Object.freeze({ step, pause, snap, invoke, fail });
})(globalThis.__stepboxHost);
try {
"#;

pub const PROGRAM_FOOTER: &str = r#"
;return await __SBX_HOOKS__.invoke(__SBX_ENTRY_NAME__, () => __SBX_ENTRY__);
} catch (__sbxError) {
return __SBX_HOOKS__.fail(__sbxError);
}
})()
"#;

/// Number of lines the header occupies before the first body line
pub fn header_lines() -> u32 {
    PROGRAM_HEADER.matches('\n').count() as u32
}
